use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use viva_core::credentials::{CredentialKind, CredentialProvider};
use viva_core::error::SessionError;

use crate::playback::AudioPayload;
use crate::provider::{SpeechBackend, SpeechSynthesizer, SynthesizedAudio};
use crate::voice::VoiceInfo;

/// The endpoint rejects requests without a voice, so this is what an unset
/// selection maps to.
const DEFAULT_VOICE: &str = "alloy";

/// Voices offered by the batch endpoint. The API has no listing call, so
/// this mirrors the published catalogue; locales are approximate.
const BATCH_VOICES: &[(&str, &str, &str)] = &[
    ("alloy", "Alloy", "en-US"),
    ("ash", "Ash", "en-US"),
    ("coral", "Coral", "en-US"),
    ("echo", "Echo", "en-US"),
    ("fable", "Fable", "en-GB"),
    ("onyx", "Onyx", "en-US"),
    ("nova", "Nova", "en-US"),
    ("sage", "Sage", "en-US"),
    ("shimmer", "Shimmer", "en-US"),
];

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

/// One-request-one-response speech synthesis against an OpenAI-compatible
/// `/audio/speech` endpoint.
pub struct BatchTts {
    client: reqwest::Client,
    base_url: String,
    model: String,
    speed: f32,
    timeout: Duration,
    api_key: Option<String>,
}

impl BatchTts {
    pub fn new(
        credentials: &dyn CredentialProvider,
        base_url: &str,
        model: &str,
        speed: f32,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            SessionError::UnsupportedEnvironment(format!("could not build http client: {e}"))
        })?;

        Ok(BatchTts {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            speed,
            timeout,
            api_key: credentials.credential(CredentialKind::BatchSpeech).map(str::to_string),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> SessionError {
        if e.is_timeout() {
            SessionError::Timeout(self.timeout)
        } else {
            SessionError::upstream_opaque(format!("speech request failed: {e}"))
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for BatchTts {
    fn kind(&self) -> SpeechBackend {
        SpeechBackend::Batch
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>, SessionError> {
        Ok(BATCH_VOICES
            .iter()
            .map(|(id, name, locale)| VoiceInfo {
                id: id.to_string(),
                name: name.to_string(),
                locale: locale.to_string(),
            })
            .collect())
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<SynthesizedAudio, SessionError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(SessionError::Precondition(
                "batch speech credential missing".to_string(),
            ));
        };

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: voice.unwrap_or(DEFAULT_VOICE),
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::upstream(status.as_u16(), body));
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        if bytes.is_empty() {
            return Err(SessionError::upstream_opaque("speech endpoint returned an empty body"));
        }
        debug!(bytes = bytes.len(), voice = request.voice, "batch synthesis complete");

        Ok(SynthesizedAudio {
            payload: AudioPayload::Encoded(bytes.to_vec()),
            backend: SpeechBackend::Batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{VoicePreference, select_voice};
    use viva_core::credentials::StaticCredentials;

    fn batch_with(credentials: &StaticCredentials) -> BatchTts {
        BatchTts::new(credentials, "https://api.openai.com/v1/", "tts-1", 1.0, Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn availability_follows_credential_presence() {
        let without = batch_with(&StaticCredentials::new());
        assert!(!without.is_available());

        let with = batch_with(
            &StaticCredentials::new().with(CredentialKind::BatchSpeech, "sk-test"),
        );
        assert!(with.is_available());
    }

    #[test]
    fn base_url_is_normalized() {
        let batch = batch_with(&StaticCredentials::new());
        assert_eq!(batch.base_url, "https://api.openai.com/v1");
    }

    #[tokio::test]
    async fn synthesize_without_credential_fails_the_precondition() {
        let batch = batch_with(&StaticCredentials::new());
        let err = batch.synthesize("Hello.", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Precondition(_)));
    }

    #[tokio::test]
    async fn catalogue_supports_language_fallback_selection() {
        let batch = batch_with(&StaticCredentials::new());
        let voices = batch.voices().await.unwrap();

        let selected = select_voice(&voices, &VoicePreference::default());
        assert_eq!(selected.map(|v| v.id.as_str()), Some("alloy"));
    }

    #[test]
    fn request_serializes_in_endpoint_shape() {
        let request = SpeechRequest {
            model: "tts-1",
            input: "Walk me through your last project.",
            voice: DEFAULT_VOICE,
            speed: 1.0,
            response_format: "mp3",
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "tts-1");
        assert_eq!(value["voice"], "alloy");
        assert_eq!(value["response_format"], "mp3");
    }
}
