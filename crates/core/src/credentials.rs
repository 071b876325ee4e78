//! Credential access for the vendor-facing providers.
//!
//! Secrets are handed to the orchestrator through an explicit
//! [`CredentialProvider`] at construction time. Nothing in the session core
//! reads the environment on its own, so a missing key is a testable
//! constructor-time condition rather than a mid-session surprise.

use std::collections::HashMap;
use std::env;
use std::fmt;

/// The per-provider credential slots a deployment can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Text generation (OpenAI-compatible chat completions).
    Generation,
    /// Batch text-to-speech over HTTP.
    BatchSpeech,
    /// Streaming text-to-speech over WebSocket.
    StreamingSpeech,
    /// Video-avatar conversation channel.
    Avatar,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Generation => "generation",
            CredentialKind::BatchSpeech => "batch-speech",
            CredentialKind::StreamingSpeech => "streaming-speech",
            CredentialKind::Avatar => "avatar",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only credential lookup passed into the orchestrator.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self, kind: CredentialKind) -> Option<&str>;

    fn has_credential(&self, kind: CredentialKind) -> bool {
        self.credential(kind).is_some()
    }
}

/// Fixed in-memory credentials, for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: HashMap<CredentialKind, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: CredentialKind, token: impl Into<String>) -> Self {
        self.tokens.insert(kind, token.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self, kind: CredentialKind) -> Option<&str> {
        self.tokens.get(&kind).map(String::as_str)
    }
}

/// Environment-backed credentials, snapshotted once at construction.
///
/// Later changes to the process environment are deliberately not observed;
/// whatever was present when the session was wired up is what it runs with.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    tokens: HashMap<CredentialKind, String>,
}

impl EnvCredentials {
    /// Reads `OPENAI_API_KEY`, `SPEECH_API_KEY` (falling back to
    /// `OPENAI_API_KEY` for OpenAI-compatible speech endpoints),
    /// `ELEVENLABS_API_KEY` and `AVATAR_API_KEY`. Empty values count as
    /// absent.
    pub fn from_env() -> Self {
        let mut tokens = HashMap::new();

        if let Some(key) = read_env("OPENAI_API_KEY") {
            tokens.insert(CredentialKind::Generation, key);
        }
        let batch = read_env("SPEECH_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(key) = batch {
            tokens.insert(CredentialKind::BatchSpeech, key);
        }
        if let Some(key) = read_env("ELEVENLABS_API_KEY") {
            tokens.insert(CredentialKind::StreamingSpeech, key);
        }
        if let Some(key) = read_env("AVATAR_API_KEY") {
            tokens.insert(CredentialKind::Avatar, key);
        }

        Self { tokens }
    }
}

impl CredentialProvider for EnvCredentials {
    fn credential(&self, kind: CredentialKind) -> Option<&str> {
        self.tokens.get(&kind).map(String::as_str)
    }
}

fn read_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
