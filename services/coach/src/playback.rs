use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::mpsc;
use tracing::debug;

use viva_core::error::SessionError;

use crate::audio;

/// How often an in-flight play polls its sink while draining.
const DRAIN_POLL: Duration = Duration::from_millis(50);
/// Poll interval for the silent engine, which has no sink to drain.
const SILENT_POLL: Duration = Duration::from_millis(10);

/// Audio a speech provider produced for one interviewer turn.
#[derive(Debug, Clone)]
pub enum AudioPayload {
    /// A complete encoded file (mp3, wav, ogg); the sink decodes it.
    Encoded(Vec<u8>),
    /// Raw mono PCM16 at the given sample rate.
    Pcm16 { samples: Vec<i16>, sample_rate: u32 },
}

/// How a play call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The audio ran to the end.
    Completed,
    /// `stop` cut the audio short. This is a normal resolution, not an
    /// error; barge-in produces one on every interruption.
    Cancelled,
}

#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Plays one complete payload, resolving when the audio drains or is
    /// stopped.
    async fn play(&self, payload: AudioPayload) -> Result<PlaybackOutcome, SessionError>;

    /// Plays PCM chunks as they arrive, resolving once the sender closes
    /// and the queued audio drains, or when stopped.
    async fn play_pcm_stream(
        &self,
        chunks: mpsc::UnboundedReceiver<Vec<i16>>,
        sample_rate: u32,
    ) -> Result<PlaybackOutcome, SessionError>;

    /// Stops whatever is playing. Idempotent; a no-op when idle.
    fn stop(&self);

    fn is_playing(&self) -> bool;
}

/// The sink currently attached to the output, plus the flag `stop` uses to
/// tell the owning play call how it ended.
struct ActivePlay {
    sink: Arc<Sink>,
    cancelled: Arc<AtomicBool>,
}

/// Speaker output through rodio.
///
/// `OutputStream` is not `Send`, so it lives on a dedicated thread for the
/// lifetime of the engine and only the sendable handle leaves it. Sinks are
/// created per play call; `stop` reaches the active one through the shared
/// slot.
pub struct RodioPlayback {
    handle: OutputStreamHandle,
    active: Mutex<Option<ActivePlay>>,
    // Dropping this disconnects the channel the audio thread blocks on,
    // which ends the thread and releases the device.
    _shutdown: std_mpsc::SyncSender<()>,
}

impl RodioPlayback {
    /// Opens the default output device, or fails with
    /// `UnsupportedEnvironment` on headless machines.
    pub fn new() -> Result<Self, SessionError> {
        let (handle_tx, handle_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::sync_channel::<()>(1);

        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    if handle_tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    // The stream must outlive every sink attached to it;
                    // recv returns once the engine is dropped.
                    let _ = shutdown_rx.recv();
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| {
                SessionError::UnsupportedEnvironment(format!("could not spawn audio thread: {e}"))
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| {
                SessionError::UnsupportedEnvironment(
                    "audio thread exited before reporting a device".to_string(),
                )
            })?
            .map_err(|e| {
                SessionError::UnsupportedEnvironment(format!("no audio output device: {e}"))
            })?;

        Ok(RodioPlayback { handle, active: Mutex::new(None), _shutdown: shutdown_tx })
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActivePlay>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_sink(&self) -> Result<Arc<Sink>, SessionError> {
        Sink::try_new(&self.handle).map(Arc::new).map_err(|e| {
            SessionError::UnsupportedEnvironment(format!("could not open audio sink: {e}"))
        })
    }

    /// Claims the active slot for a new play. Any straggler still holding
    /// the slot is stopped first; play calls are serialized upstream, so
    /// that path only fires on misuse.
    fn register(&self, sink: Arc<Sink>) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut active = self.lock_active();
        if let Some(previous) = active.take() {
            previous.cancelled.store(true, Ordering::SeqCst);
            previous.sink.stop();
        }
        *active = Some(ActivePlay { sink, cancelled: Arc::clone(&cancelled) });
        cancelled
    }

    fn release(&self, sink: &Arc<Sink>) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|play| Arc::ptr_eq(&play.sink, sink)) {
            *active = None;
        }
    }
}

#[async_trait]
impl PlaybackEngine for RodioPlayback {
    async fn play(&self, payload: AudioPayload) -> Result<PlaybackOutcome, SessionError> {
        let sink = self.new_sink()?;

        // Decode before claiming the slot so a bad payload never leaves a
        // phantom active play behind.
        let cancelled = match payload {
            AudioPayload::Encoded(bytes) => {
                let source = Decoder::new(Cursor::new(bytes))
                    .map_err(|e| SessionError::Decode(format!("audio decode failed: {e}")))?;
                let cancelled = self.register(Arc::clone(&sink));
                sink.append(source.convert_samples::<f32>());
                cancelled
            }
            AudioPayload::Pcm16 { samples, sample_rate } => {
                let cancelled = self.register(Arc::clone(&sink));
                sink.append(SamplesBuffer::new(1, sample_rate, audio::pcm16_to_f32(&samples)));
                cancelled
            }
        };

        while !sink.empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        self.release(&sink);

        Ok(outcome_from(&cancelled))
    }

    async fn play_pcm_stream(
        &self,
        mut chunks: mpsc::UnboundedReceiver<Vec<i16>>,
        sample_rate: u32,
    ) -> Result<PlaybackOutcome, SessionError> {
        let sink = self.new_sink()?;
        let cancelled = self.register(Arc::clone(&sink));

        loop {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                maybe = chunks.recv() => match maybe {
                    Some(chunk) if chunk.is_empty() => {}
                    Some(chunk) => {
                        sink.append(SamplesBuffer::new(1, sample_rate, audio::pcm16_to_f32(&chunk)));
                    }
                    None => break,
                },
                _ = tokio::time::sleep(DRAIN_POLL) => {}
            }
        }

        // The sender is gone or we were stopped; let queued audio finish
        // unless it was a stop.
        while !cancelled.load(Ordering::SeqCst) && !sink.empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        self.release(&sink);

        Ok(outcome_from(&cancelled))
    }

    fn stop(&self) {
        let mut active = self.lock_active();
        if let Some(play) = active.take() {
            play.cancelled.store(true, Ordering::SeqCst);
            play.sink.stop();
            debug!("stopped active playback");
        }
    }

    fn is_playing(&self) -> bool {
        self.lock_active().is_some()
    }
}

fn outcome_from(cancelled: &AtomicBool) -> PlaybackOutcome {
    if cancelled.load(Ordering::SeqCst) {
        PlaybackOutcome::Cancelled
    } else {
        PlaybackOutcome::Completed
    }
}

/// Engine for text-only sessions and machines without an output device.
///
/// Plays a configurable stretch of silence per payload so session pacing
/// still resembles the voiced path, and honors `stop` the same way the real
/// engine does.
pub struct NullPlayback {
    latency: Duration,
    active: Mutex<Option<Arc<AtomicBool>>>,
}

impl NullPlayback {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        NullPlayback { latency, active: Mutex::new(None) }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut active = self.lock_active();
        if let Some(previous) = active.take() {
            previous.store(true, Ordering::SeqCst);
        }
        *active = Some(Arc::clone(&flag));
        flag
    }

    fn finish(&self, flag: &Arc<AtomicBool>) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|current| Arc::ptr_eq(current, flag)) {
            *active = None;
        }
    }
}

impl Default for NullPlayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackEngine for NullPlayback {
    async fn play(&self, _payload: AudioPayload) -> Result<PlaybackOutcome, SessionError> {
        let flag = self.begin();
        let started = tokio::time::Instant::now();
        let outcome = loop {
            if flag.load(Ordering::SeqCst) {
                break PlaybackOutcome::Cancelled;
            }
            if started.elapsed() >= self.latency {
                break PlaybackOutcome::Completed;
            }
            tokio::time::sleep(SILENT_POLL).await;
        };
        self.finish(&flag);
        Ok(outcome)
    }

    async fn play_pcm_stream(
        &self,
        mut chunks: mpsc::UnboundedReceiver<Vec<i16>>,
        _sample_rate: u32,
    ) -> Result<PlaybackOutcome, SessionError> {
        let flag = self.begin();
        let outcome = loop {
            if flag.load(Ordering::SeqCst) {
                break PlaybackOutcome::Cancelled;
            }
            tokio::select! {
                maybe = chunks.recv() => {
                    if maybe.is_none() {
                        break PlaybackOutcome::Completed;
                    }
                }
                _ = tokio::time::sleep(SILENT_POLL) => {}
            }
        };
        self.finish(&flag);
        Ok(outcome)
    }

    fn stop(&self) {
        let mut active = self.lock_active();
        if let Some(flag) = active.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn is_playing(&self) -> bool {
        self.lock_active().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_payload() -> AudioPayload {
        AudioPayload::Pcm16 { samples: vec![0; 8], sample_rate: 24_000 }
    }

    #[tokio::test]
    async fn zero_latency_play_completes_immediately() {
        let engine = NullPlayback::new();
        let outcome = engine.play(short_payload()).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert!(!engine.is_playing());
    }

    #[tokio::test]
    async fn stop_resolves_pending_play_as_cancelled() {
        let engine = Arc::new(NullPlayback::with_latency(Duration::from_secs(30)));
        let player = Arc::clone(&engine);
        let pending = tokio::spawn(async move { player.play(short_payload()).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.is_playing());
        engine.stop();

        let outcome = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("stop must resolve the pending play promptly")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PlaybackOutcome::Cancelled);
        assert!(!engine.is_playing());
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let engine = NullPlayback::new();
        engine.stop();
        engine.stop();

        let outcome = engine.play(short_payload()).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
    }

    #[tokio::test]
    async fn pcm_stream_completes_when_sender_closes() {
        let engine = NullPlayback::new();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(vec![100i16; 240]).unwrap();
        tx.send(vec![-100i16; 240]).unwrap();
        drop(tx);

        let outcome = engine.play_pcm_stream(rx, 24_000).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
    }

    #[tokio::test]
    async fn stop_cancels_open_pcm_stream() {
        let engine = Arc::new(NullPlayback::new());
        let (tx, rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let player = Arc::clone(&engine);
        let pending = tokio::spawn(async move { player.play_pcm_stream(rx, 24_000).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop();

        let outcome = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("stop must resolve the pending stream promptly")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PlaybackOutcome::Cancelled);
        drop(tx);
    }
}
