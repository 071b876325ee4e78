pub mod avatar;
pub mod batch;
pub mod local;
pub mod stream;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use viva_core::error::SessionError;

use crate::playback::{AudioPayload, PlaybackEngine, PlaybackOutcome};
use crate::voice::{VoiceInfo, VoicePreference, select_voice};

/// The three speech capability variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechBackend {
    Streaming,
    Batch,
    Local,
}

impl SpeechBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechBackend::Streaming => "streaming",
            SpeechBackend::Batch => "batch",
            SpeechBackend::Local => "local",
        }
    }
}

impl fmt::Display for SpeechBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Degradation order when a speech backend fails mid-session. Exhausting
/// the list drops the session to text-only; it never tears the session
/// down.
pub const FALLBACK_ORDER: [SpeechBackend; 3] =
    [SpeechBackend::Streaming, SpeechBackend::Batch, SpeechBackend::Local];

/// Audio produced by one synthesize call, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub payload: AudioPayload,
    pub backend: SpeechBackend,
}

/// One-shot speech synthesis. The batch and local providers implement
/// this; streaming has its own duplex surface in [`stream`].
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn kind(&self) -> SpeechBackend;

    /// Whether this provider can be tried at all. Credential presence is
    /// decided at construction and never re-read per call.
    fn is_available(&self) -> bool;

    /// Voices this provider can speak with.
    async fn voices(&self) -> Result<Vec<VoiceInfo>, SessionError>;

    /// Synthesizes one complete utterance. `voice` of `None` means the
    /// provider default.
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<SynthesizedAudio, SessionError>;
}

/// Callbacks for a streaming speech channel, recorded once at open. All of
/// them are invoked from the channel's reader task.
pub trait ChannelSink: Send + Sync {
    /// PCM16 for the current utterance, delivered in upstream order.
    fn on_audio(&self, samples: Vec<i16>);
    /// The upstream finished the current utterance.
    fn on_utterance_end(&self);
    fn on_error(&self, error: SessionError);
    /// The channel is gone; no further callbacks will arrive.
    fn on_closed(&self);
}

/// Walks the one-shot providers in fallback order until one of them both
/// synthesizes and plays an utterance.
pub struct SpeechRouter {
    backends: Vec<Arc<dyn SpeechSynthesizer>>,
}

impl SpeechRouter {
    /// The walk order follows [`FALLBACK_ORDER`] regardless of the order
    /// providers were constructed in.
    pub fn new(mut backends: Vec<Arc<dyn SpeechSynthesizer>>) -> Self {
        backends.sort_by_key(|backend| fallback_rank(backend.kind()));
        SpeechRouter { backends }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Synthesizes `text` and plays it, degrading across providers.
    ///
    /// A payload that fails to decode counts against the provider that
    /// produced it, so it moves the walk along too. Errors that degrading
    /// cannot help with (a dead output device, say) surface immediately.
    /// When every provider has been tried, the last failure comes back to
    /// the caller, which handles the drop to text-only.
    pub async fn speak(
        &self,
        text: &str,
        preference: &VoicePreference,
        playback: &dyn PlaybackEngine,
    ) -> Result<(SpeechBackend, PlaybackOutcome), SessionError> {
        let mut last_error =
            SessionError::UnsupportedEnvironment("no speech provider is configured".to_string());

        for backend in &self.backends {
            if !backend.is_available() {
                debug!(provider = %backend.kind(), "skipping unavailable speech provider");
                continue;
            }

            let voice = match backend.voices().await {
                Ok(voices) => select_voice(&voices, preference).map(|v| v.id.clone()),
                Err(e) if e.is_degradable() => {
                    warn!(
                        provider = %backend.kind(),
                        error = %e,
                        "voice listing failed, trying next provider"
                    );
                    last_error = e;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let audio = match backend.synthesize(text, voice.as_deref()).await {
                Ok(audio) => audio,
                Err(e) if e.is_degradable() => {
                    warn!(
                        provider = %backend.kind(),
                        error = %e,
                        "synthesis failed, trying next provider"
                    );
                    last_error = e;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match playback.play(audio.payload).await {
                Ok(outcome) => return Ok((audio.backend, outcome)),
                Err(SessionError::Decode(message)) => {
                    warn!(
                        provider = %backend.kind(),
                        error = %message,
                        "provider audio failed to decode, trying next provider"
                    );
                    last_error = SessionError::Decode(message);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

fn fallback_rank(kind: SpeechBackend) -> usize {
    FALLBACK_ORDER.iter().position(|k| *k == kind).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::NullPlayback;
    use mockall::mock;
    use tokio::sync::mpsc;
    use viva_core::error::SessionError;

    mock! {
        Synth {}

        #[async_trait]
        impl SpeechSynthesizer for Synth {
            fn kind(&self) -> SpeechBackend;
            fn is_available(&self) -> bool;
            async fn voices(&self) -> Result<Vec<VoiceInfo>, SessionError>;
            async fn synthesize<'life0, 'life1, 'life2>(
                &'life0 self,
                text: &'life1 str,
                voice: Option<&'life2 str>,
            ) -> Result<SynthesizedAudio, SessionError>;
        }
    }

    fn pcm_audio(backend: SpeechBackend) -> SynthesizedAudio {
        SynthesizedAudio {
            payload: AudioPayload::Pcm16 { samples: vec![0; 4], sample_rate: 24_000 },
            backend,
        }
    }

    fn failing_batch() -> MockSynth {
        let mut batch = MockSynth::new();
        batch.expect_kind().return_const(SpeechBackend::Batch);
        batch.expect_is_available().return_const(true);
        batch.expect_voices().returning(|| Ok(Vec::new()));
        batch
            .expect_synthesize()
            .returning(|_, _| Err(SessionError::upstream(500, "synth exploded")));
        batch
    }

    fn working_local() -> MockSynth {
        let mut local = MockSynth::new();
        local.expect_kind().return_const(SpeechBackend::Local);
        local.expect_is_available().return_const(true);
        local.expect_voices().returning(|| Ok(Vec::new()));
        local.expect_synthesize().returning(|_, _| Ok(pcm_audio(SpeechBackend::Local)));
        local
    }

    #[tokio::test]
    async fn degrades_to_the_next_provider_on_upstream_failure() {
        // Construction order is backwards on purpose; the router walks in
        // fallback order anyway.
        let router = SpeechRouter::new(vec![Arc::new(working_local()), Arc::new(failing_batch())]);
        let playback = NullPlayback::new();

        let (backend, outcome) = router
            .speak("Tell me about yourself.", &VoicePreference::default(), &playback)
            .await
            .unwrap();

        assert_eq!(backend, SpeechBackend::Local);
        assert_eq!(outcome, PlaybackOutcome::Completed);
    }

    #[tokio::test]
    async fn unavailable_providers_are_never_called() {
        let mut batch = MockSynth::new();
        batch.expect_kind().return_const(SpeechBackend::Batch);
        batch.expect_is_available().return_const(false);
        // No synthesize expectation: a call would panic the test.

        let router = SpeechRouter::new(vec![Arc::new(batch), Arc::new(working_local())]);
        let playback = NullPlayback::new();

        let (backend, _) = router
            .speak("Next question.", &VoicePreference::default(), &playback)
            .await
            .unwrap();
        assert_eq!(backend, SpeechBackend::Local);
    }

    #[tokio::test]
    async fn exhausted_walk_returns_the_last_failure() {
        let router = SpeechRouter::new(vec![Arc::new(failing_batch())]);
        let playback = NullPlayback::new();

        let err = router
            .speak("Anyone there?", &VoicePreference::default(), &playback)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Upstream { status: Some(500), .. }));
    }

    #[tokio::test]
    async fn empty_router_reports_unsupported_environment() {
        let router = SpeechRouter::new(Vec::new());
        let playback = NullPlayback::new();

        let err = router
            .speak("Hello?", &VoicePreference::default(), &playback)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedEnvironment(_)));
    }

    #[tokio::test]
    async fn selected_voice_is_passed_to_the_provider() {
        let mut batch = MockSynth::new();
        batch.expect_kind().return_const(SpeechBackend::Batch);
        batch.expect_is_available().return_const(true);
        batch.expect_voices().returning(|| {
            Ok(vec![VoiceInfo {
                id: "v-uk".to_string(),
                name: "British English".to_string(),
                locale: "en-GB".to_string(),
            }])
        });
        batch
            .expect_synthesize()
            .withf(|_, voice| *voice == Some("v-uk"))
            .returning(|_, _| Ok(pcm_audio(SpeechBackend::Batch)));

        let router = SpeechRouter::new(vec![Arc::new(batch)]);
        let playback = NullPlayback::new();

        let preference =
            VoicePreference { accent: Some("uk".to_string()), language: "en".to_string() };
        let (backend, _) = router.speak("Welcome.", &preference, &playback).await.unwrap();
        assert_eq!(backend, SpeechBackend::Batch);
    }

    /// Playback double that rejects encoded payloads the way a corrupt
    /// response would.
    struct RejectsEncoded;

    #[async_trait]
    impl PlaybackEngine for RejectsEncoded {
        async fn play(&self, payload: AudioPayload) -> Result<PlaybackOutcome, SessionError> {
            match payload {
                AudioPayload::Encoded(_) => {
                    Err(SessionError::Decode("not an audio container".to_string()))
                }
                AudioPayload::Pcm16 { .. } => Ok(PlaybackOutcome::Completed),
            }
        }

        async fn play_pcm_stream(
            &self,
            _chunks: mpsc::UnboundedReceiver<Vec<i16>>,
            _sample_rate: u32,
        ) -> Result<PlaybackOutcome, SessionError> {
            Ok(PlaybackOutcome::Completed)
        }

        fn stop(&self) {}

        fn is_playing(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn undecodable_audio_counts_against_its_provider() {
        let mut batch = MockSynth::new();
        batch.expect_kind().return_const(SpeechBackend::Batch);
        batch.expect_is_available().return_const(true);
        batch.expect_voices().returning(|| Ok(Vec::new()));
        batch.expect_synthesize().returning(|_, _| {
            Ok(SynthesizedAudio {
                payload: AudioPayload::Encoded(b"<html>503</html>".to_vec()),
                backend: SpeechBackend::Batch,
            })
        });

        let router = SpeechRouter::new(vec![Arc::new(batch), Arc::new(working_local())]);

        let (backend, outcome) = router
            .speak("Still with me?", &VoicePreference::default(), &RejectsEncoded)
            .await
            .unwrap();
        assert_eq!(backend, SpeechBackend::Local);
        assert_eq!(outcome, PlaybackOutcome::Completed);
    }
}
