//! On-device synthesis through espeak-ng, the last audio fallback when
//! every network provider is down.

use async_trait::async_trait;

use viva_core::error::SessionError;

use crate::playback::AudioPayload;
use crate::provider::{SpeechBackend, SpeechSynthesizer, SynthesizedAudio};
use crate::voice::VoiceInfo;

/// espeak-ng output format: 22050 Hz mono PCM16.
pub const LOCAL_SAMPLE_RATE: u32 = 22_050;

/// espeak-ng's default speaking rate in words per minute.
const DEFAULT_RATE_WPM: f32 = 175.0;

#[cfg(feature = "espeak")]
mod native {
    use std::sync::OnceLock;

    use espeakng::Speaker;
    use parking_lot::Mutex;

    use viva_core::error::SessionError;

    use crate::voice::VoiceInfo;

    // espeak-ng keeps global state; one locked engine per process. A failed
    // initialise is cached too, since the engine cannot be retried.
    static SPEAKER: OnceLock<Result<Mutex<Speaker>, String>> = OnceLock::new();

    fn speaker() -> Result<&'static Mutex<Speaker>, SessionError> {
        let slot = SPEAKER.get_or_init(|| {
            espeakng::initialise(None).map_err(|e| format!("espeak-ng initialise failed: {e}"))
        });
        match slot {
            Ok(speaker) => Ok(speaker),
            Err(message) => Err(SessionError::UnsupportedEnvironment(message.clone())),
        }
    }

    pub(super) fn list_voices() -> Result<Vec<VoiceInfo>, SessionError> {
        let locked = speaker()?.lock();
        let voices = locked.get_voices().map_err(|e| {
            SessionError::UnsupportedEnvironment(format!("voice listing failed: {e}"))
        })?;

        Ok(voices
            .into_iter()
            .map(|voice| VoiceInfo {
                id: voice.identifier,
                name: voice.name,
                locale: voice.languages.first().cloned().unwrap_or_default(),
            })
            .collect())
    }

    pub(super) fn synthesize(
        text: &str,
        voice_id: Option<&str>,
        rate_wpm: i32,
    ) -> Result<Vec<i16>, SessionError> {
        let mut locked = speaker()?.lock();

        if let Some(voice_id) = voice_id {
            locked.set_voice_raw(voice_id).map_err(|e| {
                SessionError::UnsupportedEnvironment(format!("could not set voice: {e}"))
            })?;
        }
        locked.set_parameter(espeakng::Parameter::Rate, rate_wpm, 0).map_err(|e| {
            SessionError::UnsupportedEnvironment(format!("could not set speaking rate: {e}"))
        })?;

        locked
            .synthesize(text)
            .map_err(|e| SessionError::UnsupportedEnvironment(format!("synthesis failed: {e}")))
    }
}

/// espeak-ng speech. No credential and no network involved; availability
/// depends only on the engine being present on the machine.
pub struct LocalTts {
    rate_wpm: i32,
}

impl LocalTts {
    /// `speed` is the session-wide playback multiplier; espeak-ng wants
    /// words per minute.
    pub fn new(speed: f32) -> Self {
        LocalTts { rate_wpm: (speed * DEFAULT_RATE_WPM).clamp(80.0, 450.0) as i32 }
    }
}

#[cfg(feature = "espeak")]
#[async_trait]
impl SpeechSynthesizer for LocalTts {
    fn kind(&self) -> SpeechBackend {
        SpeechBackend::Local
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>, SessionError> {
        tokio::task::spawn_blocking(native::list_voices)
            .await
            .map_err(|e| SessionError::ChannelClosed(format!("voice listing task failed: {e}")))?
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<SynthesizedAudio, SessionError> {
        let text = text.to_string();
        let voice = voice.map(str::to_string);
        let rate_wpm = self.rate_wpm;

        // The engine blocks for the full synthesis, so it runs off the
        // async workers.
        let samples = tokio::task::spawn_blocking(move || {
            native::synthesize(&text, voice.as_deref(), rate_wpm)
        })
        .await
        .map_err(|e| SessionError::ChannelClosed(format!("synthesis task failed: {e}")))??;

        if samples.is_empty() {
            return Err(SessionError::UnsupportedEnvironment(
                "espeak-ng produced no audio".to_string(),
            ));
        }

        Ok(SynthesizedAudio {
            payload: AudioPayload::Pcm16 { samples, sample_rate: LOCAL_SAMPLE_RATE },
            backend: SpeechBackend::Local,
        })
    }
}

/// Without the `espeak` feature there is no engine to call; the provider
/// reports itself unavailable and the router walks past it.
#[cfg(not(feature = "espeak"))]
#[async_trait]
impl SpeechSynthesizer for LocalTts {
    fn kind(&self) -> SpeechBackend {
        SpeechBackend::Local
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>, SessionError> {
        Err(unsupported())
    }

    async fn synthesize(
        &self,
        _text: &str,
        _voice: Option<&str>,
    ) -> Result<SynthesizedAudio, SessionError> {
        Err(unsupported())
    }
}

#[cfg(not(feature = "espeak"))]
fn unsupported() -> SessionError {
    SessionError::UnsupportedEnvironment("built without the espeak feature".to_string())
}
