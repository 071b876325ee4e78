use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SPEECH_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_SPEECH_MODEL: &str = "tts-1";
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 20;
const DEFAULT_TRANSCRIPT_WINDOW: usize = 12;
const DEFAULT_VOICE_LANGUAGE: &str = "en";
const DEFAULT_SPEECH_SPEED: f32 = 1.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Runtime settings for the coach binary, resolved once at startup.
///
/// Credentials are deliberately not part of this struct; they are read
/// through `viva_core::credentials` so providers can be constructed against
/// any credential source.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat model used for interviewer turn generation.
    pub generation_model: String,
    /// Override for the generation API base URL (proxies, self-hosted).
    pub generation_api_base: Option<String>,
    /// Base URL for the batch text-to-speech REST API.
    pub speech_api_base: String,
    /// Model name for batch text-to-speech requests.
    pub speech_model: String,
    /// WebSocket endpoint for streaming text-to-speech. Streaming is only
    /// attempted when this is set.
    pub stream_tts_url: Option<String>,
    /// Preferred voice id for the streaming endpoint.
    pub stream_voice_id: Option<String>,
    /// WebSocket endpoint for the avatar relay. Required in avatar mode.
    pub avatar_url: Option<String>,
    /// Upper bound for any single upstream call.
    pub call_timeout: Duration,
    /// How many recent turns are handed to the generator as context.
    pub transcript_window: usize,
    /// Base language for voice selection, e.g. "en".
    pub voice_language: String,
    /// Playback speed passed to speech providers that support it.
    pub speech_speed: f32,
    pub log_level: Level,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Tests control the environment themselves; a developer's .env must
        // not bleed into them.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let call_timeout_secs = match read("CALL_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().ok().filter(|secs| *secs > 0).ok_or_else(|| {
                ConfigError::InvalidValue {
                    var: "CALL_TIMEOUT_SECS".to_string(),
                    message: format!("expected a positive integer, got {raw:?}"),
                }
            })?,
            None => DEFAULT_CALL_TIMEOUT_SECS,
        };

        let transcript_window = match read("TRANSCRIPT_WINDOW") {
            Some(raw) => raw.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ConfigError::InvalidValue {
                    var: "TRANSCRIPT_WINDOW".to_string(),
                    message: format!("expected a positive integer, got {raw:?}"),
                }
            })?,
            None => DEFAULT_TRANSCRIPT_WINDOW,
        };

        let speech_speed = match read("SPEECH_SPEED") {
            Some(raw) => {
                let parsed = raw.parse::<f32>().map_err(|_| ConfigError::InvalidValue {
                    var: "SPEECH_SPEED".to_string(),
                    message: format!("expected a number, got {raw:?}"),
                })?;
                if !(0.25..=4.0).contains(&parsed) {
                    return Err(ConfigError::InvalidValue {
                        var: "SPEECH_SPEED".to_string(),
                        message: format!("{parsed} is outside the supported range 0.25..=4.0"),
                    });
                }
                parsed
            }
            None => DEFAULT_SPEECH_SPEED,
        };

        let log_level = match read("RUST_LOG") {
            Some(raw) => Level::from_str(&raw).map_err(|_| ConfigError::InvalidValue {
                var: "RUST_LOG".to_string(),
                message: format!("{raw:?} is not a log level"),
            })?,
            None => Level::INFO,
        };

        Ok(Config {
            generation_model: read("GENERATION_MODEL")
                .unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
            generation_api_base: read("GENERATION_API_BASE"),
            speech_api_base: read("SPEECH_API_BASE")
                .unwrap_or_else(|| DEFAULT_SPEECH_API_BASE.to_string()),
            speech_model: read("SPEECH_MODEL").unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string()),
            stream_tts_url: read("STREAM_TTS_URL"),
            stream_voice_id: read("STREAM_VOICE_ID"),
            avatar_url: read("AVATAR_URL"),
            call_timeout: Duration::from_secs(call_timeout_secs),
            transcript_window,
            voice_language: read("VOICE_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_VOICE_LANGUAGE.to_string()),
            speech_speed,
            log_level,
        })
    }

    /// Avatar mode cannot run without a relay endpoint.
    pub fn require_avatar_url(&self) -> Result<&str, ConfigError> {
        self.avatar_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("AVATAR_URL".to_string()))
    }
}

/// Reads an environment variable, treating blank values as unset.
fn read(var: &str) -> Option<String> {
    env::var(var).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
