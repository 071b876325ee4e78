//! The interview session state machine: one interviewer, one candidate,
//! one conversation from greeting to closing summary.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::SecondsFormat;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use viva_core::error::SessionError;
use viva_core::generator::{GeneratedTurn, ScriptedGenerator, TurnContext, TurnGenerator};
use viva_core::interview::{
    CandidateProfile, ContinuationVerdict, Difficulty, InterviewCategory, SessionPlan, TurnPhase,
    enforce_budget, phase_for,
};
use viva_core::transcript::{Role, Transcript};

use crate::playback::{PlaybackEngine, PlaybackOutcome};
use crate::provider::avatar::{AvatarChannel, AvatarSink};
use crate::provider::stream::{STREAM_SAMPLE_RATE, StreamingTts, TtsChannel};
use crate::provider::{ChannelSink, SpeechBackend, SpeechRouter};
use crate::voice::VoicePreference;

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Starting,
    Speaking,
    Listening,
    WrappingUp,
    Ended,
    Failed,
}

/// How interviewer turns reach the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewerMode {
    Voice,
    TextOnly,
    Avatar,
}

impl InterviewerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewerMode::Voice => "voice",
            InterviewerMode::TextOnly => "text",
            InterviewerMode::Avatar => "avatar",
        }
    }
}

impl fmt::Display for InterviewerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterviewerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "voice" => Ok(InterviewerMode::Voice),
            "text" | "text-only" => Ok(InterviewerMode::TextOnly),
            "avatar" => Ok(InterviewerMode::Avatar),
            other => Err(format!("unknown mode {other:?}, expected voice, text or avatar")),
        }
    }
}

/// Notifications pushed to whoever drives the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A new interviewer line was committed to the transcript.
    InterviewerTurn { text: String },
    PlaybackStarted,
    /// The active speak attempt resolved; the driver should call
    /// [`InterviewSession::playback_done`].
    PlaybackFinished,
    /// Turn generation fell back to the scripted bank for this turn.
    GeneratorDegraded { reason: String },
    /// Every speech path failed; the turn was delivered as text only.
    SpeechLost,
    SummaryReady { text: String },
    SessionFailed { reason: String },
}

/// What a speak attempt reported back.
#[derive(Debug, Clone, Copy)]
pub struct SpeakResult {
    /// Which backend voiced the turn; `None` when no audio was involved
    /// (text-only mode, the avatar, or a full speech loss).
    pub backend: Option<SpeechBackend>,
    /// `None` means no playback happened at all.
    pub outcome: Option<PlaybackOutcome>,
}

/// Connection settings for the avatar relay, resolved by the caller.
#[derive(Debug, Clone)]
pub struct AvatarConfig {
    pub url: String,
    pub token: Option<String>,
    pub open_timeout: Duration,
}

/// Everything a session needs wired in before it can start.
pub struct SessionParts {
    pub generator: Arc<dyn TurnGenerator>,
    pub speech: Arc<SpeechRouter>,
    pub streaming: Option<StreamingTts>,
    pub avatar: Option<AvatarConfig>,
    pub playback: Arc<dyn PlaybackEngine>,
    pub voice: VoicePreference,
    pub transcript_window: usize,
}

/// Handle to the speak attempt currently in flight.
struct SpeakHandle {
    done: oneshot::Receiver<SpeakResult>,
    task: Option<JoinHandle<()>>,
}

impl SpeakHandle {
    async fn wait(self) -> SpeakResult {
        match self.done.await {
            Ok(result) => result,
            // The sender only disappears when the speak task was aborted;
            // that is a cancellation.
            Err(_) => SpeakResult { backend: None, outcome: Some(PlaybackOutcome::Cancelled) },
        }
    }
}

/// Routes streamed audio into the playback engine for the turn currently
/// being spoken. The channel outlives turns; this bridge swaps the
/// per-turn sender in and out.
struct StreamBridge {
    current: Mutex<Option<mpsc::UnboundedSender<Vec<i16>>>>,
    alive: AtomicBool,
}

impl StreamBridge {
    fn new() -> Arc<Self> {
        Arc::new(StreamBridge { current: Mutex::new(None), alive: AtomicBool::new(true) })
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Vec<i16>>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_turn(&self, sender: mpsc::UnboundedSender<Vec<i16>>) {
        *self.lock_current() = Some(sender);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl ChannelSink for StreamBridge {
    fn on_audio(&self, samples: Vec<i16>) {
        let mut current = self.lock_current();
        if let Some(sender) = current.as_ref() {
            // A failed send means the playback side hung up, which is how
            // barge-in looks from here; the rest of the utterance is noise.
            if sender.send(samples).is_err() {
                *current = None;
            }
        }
    }

    fn on_utterance_end(&self) {
        // Dropping the sender lets the playback call drain and resolve.
        self.lock_current().take();
    }

    fn on_error(&self, error: SessionError) {
        warn!(error = %error, "streaming speech channel reported an error");
        self.lock_current().take();
    }

    fn on_closed(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.lock_current().take();
        debug!("streaming speech channel closed");
    }
}

/// Resolves per-turn speak handles from avatar lifecycle callbacks.
struct AvatarBridge {
    turn: Mutex<Option<oneshot::Sender<SpeakResult>>>,
    alive: AtomicBool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl AvatarBridge {
    fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Arc<Self> {
        Arc::new(AvatarBridge { turn: Mutex::new(None), alive: AtomicBool::new(true), events })
    }

    fn lock_turn(&self) -> MutexGuard<'_, Option<oneshot::Sender<SpeakResult>>> {
        self.turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_turn(&self, done: oneshot::Sender<SpeakResult>) {
        *self.lock_turn() = Some(done);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn resolve(&self, result: SpeakResult) {
        if let Some(done) = self.lock_turn().take() {
            let _ = done.send(result);
            let _ = self.events.send(SessionEvent::PlaybackFinished);
        }
    }

    /// Resolves the pending turn as silent; used when a say command fails
    /// or the candidate barges in.
    fn abort_turn(&self) {
        self.resolve(SpeakResult { backend: None, outcome: Some(PlaybackOutcome::Cancelled) });
    }
}

impl AvatarSink for AvatarBridge {
    fn on_speaking_started(&self) {
        debug!("avatar speaking");
    }

    fn on_speaking_done(&self) {
        self.resolve(SpeakResult { backend: None, outcome: Some(PlaybackOutcome::Completed) });
    }

    fn on_error(&self, error: SessionError) {
        warn!(error = %error, "avatar relay reported an error");
        self.abort_turn();
    }

    fn on_closed(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.abort_turn();
    }
}

/// One live interview.
///
/// The session owns the transcript and the delivery channels; the driver
/// (the CLI, or a test) calls the public methods and reacts to
/// [`SessionEvent`]s. All speech failures degrade; the only fatal errors
/// are failed start preconditions.
pub struct InterviewSession {
    id: Uuid,
    plan: SessionPlan,
    mode: InterviewerMode,
    profile: Option<CandidateProfile>,
    state: SessionState,
    /// Set once the turn being spoken is the session's last.
    closing: bool,
    transcript: Transcript,
    summary: Option<String>,
    generator: Arc<dyn TurnGenerator>,
    scripted: ScriptedGenerator,
    speech: Arc<SpeechRouter>,
    streaming: Option<StreamingTts>,
    stream_channel: Option<(TtsChannel, Arc<StreamBridge>)>,
    avatar_config: Option<AvatarConfig>,
    avatar: Option<(AvatarChannel, Arc<AvatarBridge>)>,
    playback: Arc<dyn PlaybackEngine>,
    voice: VoicePreference,
    window: usize,
    events: mpsc::UnboundedSender<SessionEvent>,
    speak: Option<SpeakHandle>,
}

impl InterviewSession {
    pub fn new(
        plan: SessionPlan,
        mode: InterviewerMode,
        profile: Option<CandidateProfile>,
        parts: SessionParts,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = InterviewSession {
            id: Uuid::new_v4(),
            plan,
            mode,
            profile,
            state: SessionState::Idle,
            closing: false,
            transcript: Transcript::new(),
            summary: None,
            generator: parts.generator,
            scripted: ScriptedGenerator::new(),
            speech: parts.speech,
            streaming: parts.streaming,
            stream_channel: None,
            avatar_config: parts.avatar,
            avatar: None,
            playback: parts.playback,
            voice: parts.voice,
            window: parts.transcript_window,
            events,
            speak: None,
        };
        (session, events_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn is_speaking(&self) -> bool {
        self.speak.is_some()
    }

    /// Runs the start preconditions, connects delivery channels, and
    /// speaks the opening turn. Precondition failures move the session to
    /// `Failed`; they are the one kind of error that ends it.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Precondition(format!(
                "session cannot start from {:?}",
                self.state
            )));
        }
        self.set_state(SessionState::Starting);

        if self.plan.turn_budget == 0 {
            return Err(self.fail(SessionError::Precondition(
                "turn budget must be at least one".to_string(),
            )));
        }

        if self.mode == InterviewerMode::Avatar {
            let Some(config) = self.avatar_config.clone() else {
                return Err(self.fail(SessionError::Precondition(
                    "avatar mode requires a relay endpoint".to_string(),
                )));
            };
            let bridge = AvatarBridge::new(self.events.clone());
            match AvatarChannel::connect(
                &config.url,
                config.token.as_deref(),
                config.open_timeout,
                bridge.clone(),
            )
            .await
            {
                Ok(channel) => self.avatar = Some((channel, bridge)),
                Err(e) => return Err(self.fail(e)),
            }
        }

        if self.mode == InterviewerMode::Voice {
            self.open_stream_channel().await;
        }

        info!(
            session = %self.id,
            category = %self.plan.category,
            difficulty = %self.plan.difficulty,
            budget = self.plan.turn_budget,
            mode = %self.mode,
            "interview session starting"
        );

        let turn = self.generate_turn().await;
        self.commit_interviewer_turn(turn);
        Ok(())
    }

    /// Records the candidate's reply and moves the interview forward.
    ///
    /// A reply arriving while the interviewer is mid-sentence is the
    /// barge-in path: the voice stops, the pending playback resolves as
    /// cancelled, and the reply lands in the transcript before the next
    /// turn is generated.
    pub async fn submit_reply(&mut self, text: &str) -> Result<(), SessionError> {
        match self.state {
            SessionState::Speaking | SessionState::Listening | SessionState::WrappingUp => {}
            state => {
                return Err(SessionError::Precondition(format!(
                    "cannot accept a reply in state {state:?}"
                )));
            }
        }

        let text = text.trim();
        if text.is_empty() {
            debug!(session = %self.id, "ignoring empty reply");
            return Ok(());
        }

        self.cancel_active_speech().await;
        self.transcript.append(Role::Candidate, text);
        info!(session = %self.id, turns = self.transcript.len(), "candidate reply recorded");

        if self.closing {
            // The goodbye was already on its way out; keep the reply but
            // ask nothing further.
            self.finish().await;
            return Ok(());
        }

        let turn = self.generate_turn().await;
        self.commit_interviewer_turn(turn);
        Ok(())
    }

    /// Waits for the active speak attempt and applies the state
    /// transition it implies. Drivers call this on `PlaybackFinished`;
    /// calling it with nothing in flight is a no-op.
    pub async fn playback_done(&mut self) -> Option<SpeakResult> {
        let handle = self.speak.take()?;
        let result = handle.wait().await;
        debug!(
            session = %self.id,
            backend = ?result.backend,
            outcome = ?result.outcome,
            "speak attempt resolved"
        );

        match self.state {
            SessionState::Speaking => self.set_state(SessionState::Listening),
            SessionState::WrappingUp if self.closing => self.finish().await,
            _ => {}
        }
        Some(result)
    }

    /// Ends the session early. Idempotent, and never an error; whatever is
    /// playing stops, channels close, and the transcript stays as it is.
    pub async fn end(&mut self) {
        if matches!(self.state, SessionState::Ended | SessionState::Failed) {
            return;
        }
        info!(session = %self.id, "session ended by the candidate");
        self.cancel_active_speech().await;
        self.close_channels();
        self.set_state(SessionState::Ended);
    }

    /// Serializable view of the whole session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            category: self.plan.category,
            difficulty: self.plan.difficulty,
            state: self.state,
            summary: self.summary.clone(),
            turns: self
                .transcript
                .all()
                .iter()
                .map(|turn| SnapshotTurn {
                    role: turn.role,
                    content: turn.content.clone(),
                    timestamp_iso: turn.spoken_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                })
                .collect(),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(session = %self.id, from = ?self.state, to = ?state, "session state change");
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        warn!(session = %self.id, error = %error, "session failed");
        self.set_state(SessionState::Failed);
        self.emit(SessionEvent::SessionFailed { reason: error.to_string() });
        error
    }

    /// Best effort: a streaming channel that cannot open degrades to the
    /// one-shot providers, it never aborts the session.
    async fn open_stream_channel(&mut self) {
        let Some(streaming) = self.streaming.as_ref() else {
            return;
        };
        if !streaming.is_available() {
            debug!(session = %self.id, "streaming speech not configured");
            return;
        }
        let bridge = StreamBridge::new();
        match streaming.open_channel(bridge.clone()).await {
            Ok(channel) => self.stream_channel = Some((channel, bridge)),
            Err(e) => {
                warn!(
                    session = %self.id,
                    error = %e,
                    "streaming speech unavailable, batch and local remain"
                );
            }
        }
    }

    /// Builds the next interviewer turn, degrading to the scripted bank
    /// when the generator fails or was never configured. The returned
    /// verdict is already clamped against the budget, and never softens
    /// once the session is wrapping up.
    async fn generate_turn(&mut self) -> GeneratedTurn {
        let asked = self.transcript.interviewer_turns();
        let budget = self.plan.turn_budget;

        let mut phase = phase_for(asked, budget);
        if self.state == SessionState::WrappingUp
            && matches!(phase, TurnPhase::Opening | TurnPhase::Followup)
        {
            phase = TurnPhase::WrapUp;
        }

        let context = TurnContext {
            category: self.plan.category,
            difficulty: self.plan.difficulty,
            phase,
            turn_index: asked,
            recent_turns: self.transcript.recent_window(self.window).to_vec(),
            profile: self.profile.clone(),
        };

        let mut turn = if self.generator.is_available() {
            match self.generator.next_turn(&context).await {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(
                        session = %self.id,
                        generator = self.generator.name(),
                        error = %e,
                        "turn generation failed, using scripted line"
                    );
                    self.emit(SessionEvent::GeneratorDegraded { reason: e.to_string() });
                    GeneratedTurn {
                        text: self.scripted.line_for(&context),
                        verdict: ContinuationVerdict::Continue,
                    }
                }
            }
        } else {
            debug!(session = %self.id, "generator unavailable, using scripted line");
            GeneratedTurn {
                text: self.scripted.line_for(&context),
                verdict: ContinuationVerdict::Continue,
            }
        };

        let ratchet = if self.state == SessionState::WrappingUp {
            ContinuationVerdict::WrapUp
        } else {
            ContinuationVerdict::Continue
        };
        turn.verdict = enforce_budget(turn.verdict, asked, budget).max(ratchet);
        turn
    }

    fn commit_interviewer_turn(&mut self, turn: GeneratedTurn) {
        self.transcript.append(Role::Interviewer, &turn.text);
        self.emit(SessionEvent::InterviewerTurn { text: turn.text.clone() });
        info!(
            session = %self.id,
            asked = self.transcript.interviewer_turns(),
            verdict = ?turn.verdict,
            "interviewer turn committed"
        );

        match turn.verdict {
            ContinuationVerdict::Continue => self.set_state(SessionState::Speaking),
            ContinuationVerdict::WrapUp => {
                self.closing = false;
                self.set_state(SessionState::WrappingUp);
            }
            ContinuationVerdict::Complete => {
                self.closing = true;
                self.set_state(SessionState::WrappingUp);
            }
        }

        self.begin_speaking(turn.text);
    }

    /// Spawns the delivery path for a committed turn. Every path resolves
    /// the speak handle and emits `PlaybackFinished`, even on total
    /// failure; the turn itself is already in the transcript.
    fn begin_speaking(&mut self, text: String) {
        debug_assert!(self.speak.is_none());
        let (done_tx, done_rx) = oneshot::channel();
        self.emit(SessionEvent::PlaybackStarted);

        let task = match self.mode {
            InterviewerMode::TextOnly => {
                let _ = done_tx.send(SpeakResult { backend: None, outcome: None });
                self.emit(SessionEvent::PlaybackFinished);
                None
            }
            InterviewerMode::Avatar => {
                self.speak_via_avatar(&text, done_tx);
                None
            }
            InterviewerMode::Voice => Some(self.speak_via_voice(text, done_tx)),
        };

        self.speak = Some(SpeakHandle { done: done_rx, task });
    }

    fn speak_via_avatar(&mut self, text: &str, done_tx: oneshot::Sender<SpeakResult>) {
        if let Some((channel, bridge)) = self.avatar.take() {
            if channel.is_open() && bridge.is_alive() {
                bridge.begin_turn(done_tx);
                match channel.say(text) {
                    Ok(()) => self.avatar = Some((channel, bridge)),
                    Err(e) => {
                        warn!(session = %self.id, error = %e, "avatar say failed, continuing text-only");
                        bridge.abort_turn();
                        self.emit(SessionEvent::SpeechLost);
                    }
                }
                return;
            }
        }

        warn!(session = %self.id, "avatar channel is gone, continuing text-only");
        self.emit(SessionEvent::SpeechLost);
        let _ = done_tx.send(SpeakResult { backend: None, outcome: None });
        self.emit(SessionEvent::PlaybackFinished);
    }

    /// Streaming first, then the one-shot router. A streaming push that
    /// fails drops the channel and falls through to the router for this
    /// same turn; a bad chunk mid-stream only costs the rest of that
    /// utterance.
    fn speak_via_voice(
        &mut self,
        text: String,
        done_tx: oneshot::Sender<SpeakResult>,
    ) -> JoinHandle<()> {
        if let Some((channel, bridge)) = self.stream_channel.take() {
            if channel.is_open() && bridge.is_alive() {
                let (audio_tx, audio_rx) = mpsc::unbounded_channel();
                bridge.begin_turn(audio_tx);
                match channel.push_text(&text).and_then(|_| channel.end_utterance()) {
                    Ok(()) => {
                        self.stream_channel = Some((channel, bridge));
                        let playback = self.playback.clone();
                        let events = self.events.clone();
                        return tokio::spawn(async move {
                            let result =
                                match playback.play_pcm_stream(audio_rx, STREAM_SAMPLE_RATE).await {
                                    Ok(outcome) => SpeakResult {
                                        backend: Some(SpeechBackend::Streaming),
                                        outcome: Some(outcome),
                                    },
                                    Err(e) => {
                                        warn!(error = %e, "streamed playback failed");
                                        SpeakResult {
                                            backend: Some(SpeechBackend::Streaming),
                                            outcome: None,
                                        }
                                    }
                                };
                            let _ = done_tx.send(result);
                            let _ = events.send(SessionEvent::PlaybackFinished);
                        });
                    }
                    Err(e) => {
                        warn!(session = %self.id, error = %e, "streaming push failed, dropping the channel");
                    }
                }
            } else {
                debug!(session = %self.id, "streaming channel no longer alive");
            }
        }

        let router = self.speech.clone();
        let playback = self.playback.clone();
        let events = self.events.clone();
        let preference = self.voice.clone();
        tokio::spawn(async move {
            let result = match router.speak(&text, &preference, playback.as_ref()).await {
                Ok((backend, outcome)) => {
                    SpeakResult { backend: Some(backend), outcome: Some(outcome) }
                }
                Err(e) => {
                    warn!(error = %e, "all speech providers failed, delivering as text");
                    let _ = events.send(SessionEvent::SpeechLost);
                    SpeakResult { backend: None, outcome: None }
                }
            };
            let _ = done_tx.send(result);
            let _ = events.send(SessionEvent::PlaybackFinished);
        })
    }

    /// Stops the voice without touching the transcript and resolves the
    /// in-flight speak attempt. Aborting the speak task is what keeps a
    /// barge-in instant even while a provider call is still in flight.
    async fn cancel_active_speech(&mut self) {
        let Some(mut handle) = self.speak.take() else {
            return;
        };
        self.playback.stop();
        if let Some((channel, bridge)) = self.avatar.as_ref() {
            let _ = channel.interrupt();
            bridge.abort_turn();
        }
        if let Some(task) = handle.task.take() {
            task.abort();
        }
        let result = handle.wait().await;
        debug!(session = %self.id, outcome = ?result.outcome, "active speech cancelled");
    }

    /// Produces the closing summary and ends the session.
    async fn finish(&mut self) {
        if matches!(self.state, SessionState::Ended | SessionState::Failed) {
            return;
        }

        let summary = if self.generator.is_available() {
            match self.generator.closing_summary(self.transcript.all()).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(
                        session = %self.id,
                        error = %e,
                        "summary generation failed, using scripted summary"
                    );
                    self.scripted_summary().await
                }
            }
        } else {
            self.scripted_summary().await
        };

        self.summary = Some(summary.clone());
        self.emit(SessionEvent::SummaryReady { text: summary });
        self.close_channels();
        info!(session = %self.id, turns = self.transcript.len(), "interview complete");
        self.set_state(SessionState::Ended);
    }

    async fn scripted_summary(&self) -> String {
        self.scripted
            .closing_summary(self.transcript.all())
            .await
            .unwrap_or_else(|_| "Thanks for practicing today.".to_string())
    }

    /// Graceful close requests; the channels themselves are dropped with
    /// the session.
    fn close_channels(&self) {
        if let Some((channel, _)) = self.stream_channel.as_ref() {
            channel.close();
        }
        if let Some((channel, _)) = self.avatar.as_ref() {
            channel.close();
        }
    }
}

/// Serializable view of a session for the end-of-run transcript dump.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub category: InterviewCategory,
    pub difficulty: Difficulty,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub turns: Vec<SnapshotTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTurn {
    pub role: Role,
    pub content: String,
    pub timestamp_iso: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{AudioPayload, NullPlayback};
    use crate::provider::{SpeechSynthesizer, SynthesizedAudio};
    use crate::voice::VoiceInfo;
    use async_trait::async_trait;
    use viva_core::transcript::Turn;

    fn plan(budget: u32) -> SessionPlan {
        SessionPlan::new(InterviewCategory::Technical, Difficulty::Mid, budget)
    }

    fn scripted_parts() -> SessionParts {
        SessionParts {
            generator: Arc::new(ScriptedGenerator::new()),
            speech: Arc::new(SpeechRouter::new(Vec::new())),
            streaming: None,
            avatar: None,
            playback: Arc::new(NullPlayback::new()),
            voice: VoicePreference::default(),
            transcript_window: 8,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Drives a session the way the CLI would, answering every question
    /// with the same line until it ends.
    async fn run_to_completion(session: &mut InterviewSession) {
        let mut guard = 0;
        while session.state() != SessionState::Ended {
            session.playback_done().await;
            if !session.is_speaking()
                && matches!(
                    session.state(),
                    SessionState::Listening | SessionState::WrappingUp
                )
            {
                session
                    .submit_reply("I would profile the slow path before changing anything.")
                    .await
                    .unwrap();
            }
            guard += 1;
            assert!(guard < 64, "session failed to converge");
        }
    }

    #[tokio::test]
    async fn scripted_session_runs_to_completion_within_budget() {
        let (mut session, mut events) =
            InterviewSession::new(plan(3), InterviewerMode::Voice, None, scripted_parts());
        session.start().await.unwrap();
        run_to_completion(&mut session).await;

        assert_eq!(session.state(), SessionState::Ended);
        // Budget of three means at most four interviewer turns: three
        // questions plus the goodbye.
        assert_eq!(session.transcript().interviewer_turns(), 4);
        assert!(session.summary().is_some());

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::SummaryReady { .. })));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SessionEvent::StateChanged(SessionState::Ended)))
        );
    }

    #[tokio::test]
    async fn budget_of_one_asks_a_final_question_then_closes() {
        let (mut session, _events) =
            InterviewSession::new(plan(1), InterviewerMode::TextOnly, None, scripted_parts());
        session.start().await.unwrap();

        // The first question is already the last one.
        assert_eq!(session.state(), SessionState::WrappingUp);
        session.playback_done().await;
        assert_eq!(session.state(), SessionState::WrappingUp);

        session.submit_reply("Ship it behind a flag and watch the dashboards.").await.unwrap();
        session.playback_done().await;

        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.transcript().interviewer_turns(), 2);
        assert!(session.summary().is_some());
    }

    /// Always synthesizes a short silent clip; pairs with a slow playback
    /// engine to keep a turn audibly "in flight" during tests.
    struct ToneSynth;

    #[async_trait]
    impl SpeechSynthesizer for ToneSynth {
        fn kind(&self) -> SpeechBackend {
            SpeechBackend::Local
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn voices(&self) -> Result<Vec<VoiceInfo>, SessionError> {
            Ok(Vec::new())
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice: Option<&str>,
        ) -> Result<SynthesizedAudio, SessionError> {
            Ok(SynthesizedAudio {
                payload: AudioPayload::Pcm16 { samples: vec![0; 220], sample_rate: 22_050 },
                backend: SpeechBackend::Local,
            })
        }
    }

    #[tokio::test]
    async fn barge_in_cancels_playback_and_keeps_the_reply() {
        let mut parts = scripted_parts();
        parts.speech =
            Arc::new(SpeechRouter::new(vec![Arc::new(ToneSynth) as Arc<dyn SpeechSynthesizer>]));
        parts.playback = Arc::new(NullPlayback::with_latency(Duration::from_secs(30)));
        let (mut session, _events) =
            InterviewSession::new(plan(3), InterviewerMode::Voice, None, parts);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Speaking);

        // No playback_done in between: the candidate talks over the
        // interviewer.
        let answered = tokio::time::timeout(
            Duration::from_secs(2),
            session.submit_reply("Sorry to jump in, but my answer is caching."),
        )
        .await;
        assert!(answered.is_ok(), "barge-in must not wait for the full playback");

        assert_eq!(session.transcript().len(), 3);
        assert_eq!(session.transcript().all()[1].role, Role::Candidate);
        assert!(session.is_speaking());
    }

    #[tokio::test]
    async fn replies_before_start_are_rejected() {
        let (mut session, _events) =
            InterviewSession::new(plan(3), InterviewerMode::TextOnly, None, scripted_parts());

        let err = session.submit_reply("hello?").await.unwrap_err();
        assert!(matches!(err, SessionError::Precondition(_)));
    }

    #[tokio::test]
    async fn end_is_idempotent_and_blocks_further_replies() {
        let (mut session, _events) =
            InterviewSession::new(plan(3), InterviewerMode::TextOnly, None, scripted_parts());
        session.start().await.unwrap();

        session.end().await;
        assert_eq!(session.state(), SessionState::Ended);
        session.end().await;
        assert_eq!(session.state(), SessionState::Ended);

        let err = session.submit_reply("one more thing").await.unwrap_err();
        assert!(matches!(err, SessionError::Precondition(_)));
    }

    #[tokio::test]
    async fn empty_replies_are_ignored() {
        let (mut session, _events) =
            InterviewSession::new(plan(3), InterviewerMode::TextOnly, None, scripted_parts());
        session.start().await.unwrap();
        session.playback_done().await;

        let before = session.transcript().len();
        session.submit_reply("   ").await.unwrap();
        assert_eq!(session.transcript().len(), before);
    }

    #[tokio::test]
    async fn snapshot_serializes_in_camel_case() {
        let (mut session, _events) =
            InterviewSession::new(plan(1), InterviewerMode::TextOnly, None, scripted_parts());
        session.start().await.unwrap();
        run_to_completion(&mut session).await;

        let value = serde_json::to_value(session.snapshot()).unwrap();
        assert!(value["sessionId"].is_string());
        assert_eq!(value["category"], "technical");
        assert_eq!(value["difficulty"], "mid");
        assert_eq!(value["state"], "ended");
        assert_eq!(value["turns"][0]["role"], "interviewer");
        assert!(value["turns"][0]["timestampIso"].is_string());
        assert!(value["summary"].is_string());
    }

    struct FailingGenerator;

    #[async_trait]
    impl TurnGenerator for FailingGenerator {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn next_turn(&self, _ctx: &TurnContext) -> Result<GeneratedTurn, SessionError> {
            Err(SessionError::upstream(500, "model overloaded"))
        }

        async fn closing_summary(&self, _turns: &[Turn]) -> Result<String, SessionError> {
            Err(SessionError::upstream(500, "model overloaded"))
        }
    }

    #[tokio::test]
    async fn generator_failure_degrades_to_scripted_lines_and_summary() {
        let mut parts = scripted_parts();
        parts.generator = Arc::new(FailingGenerator);
        let (mut session, mut events) =
            InterviewSession::new(plan(2), InterviewerMode::TextOnly, None, parts);
        session.start().await.unwrap();
        run_to_completion(&mut session).await;

        assert_eq!(session.state(), SessionState::Ended);
        assert!(session.summary().is_some());
        assert!(!session.transcript().all()[0].content.is_empty());

        let events = drain(&mut events);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SessionEvent::GeneratorDegraded { .. }))
        );
    }

    #[tokio::test]
    async fn voice_mode_without_providers_emits_speech_lost_and_continues() {
        let (mut session, mut events) =
            InterviewSession::new(plan(2), InterviewerMode::Voice, None, scripted_parts());
        session.start().await.unwrap();
        let result = session.playback_done().await.unwrap();

        assert_eq!(result.backend, None);
        assert_eq!(result.outcome, None);
        assert_eq!(session.state(), SessionState::Listening);
        assert!(drain(&mut events).iter().any(|e| matches!(e, SessionEvent::SpeechLost)));
    }

    #[tokio::test]
    async fn stream_bridge_forwards_audio_until_utterance_end() {
        let bridge = StreamBridge::new();
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
        bridge.begin_turn(audio_tx);

        bridge.on_audio(vec![1, 2, 3]);
        assert_eq!(audio_rx.recv().await, Some(vec![1, 2, 3]));

        bridge.on_utterance_end();
        assert_eq!(audio_rx.recv().await, None);
        assert!(bridge.is_alive());

        bridge.on_closed();
        assert!(!bridge.is_alive());
    }

    #[tokio::test]
    async fn avatar_bridge_resolves_the_pending_turn_once() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let bridge = AvatarBridge::new(events_tx);
        let (done_tx, done_rx) = oneshot::channel();
        bridge.begin_turn(done_tx);

        bridge.on_speaking_done();
        let result = done_rx.await.unwrap();
        assert_eq!(result.outcome, Some(PlaybackOutcome::Completed));
        assert!(matches!(events_rx.try_recv(), Ok(SessionEvent::PlaybackFinished)));

        // A late done must not emit a second completion.
        bridge.on_speaking_done();
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn mode_parses_the_cli_spellings() {
        assert_eq!("voice".parse::<InterviewerMode>().unwrap(), InterviewerMode::Voice);
        assert_eq!("TEXT".parse::<InterviewerMode>().unwrap(), InterviewerMode::TextOnly);
        assert_eq!("text-only".parse::<InterviewerMode>().unwrap(), InterviewerMode::TextOnly);
        assert_eq!("avatar".parse::<InterviewerMode>().unwrap(), InterviewerMode::Avatar);
        assert!("hologram".parse::<InterviewerMode>().is_err());
    }
}
