//! Error taxonomy shared by the session core and the coach runtime.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while driving an interview session.
///
/// Provider-level failures (`Upstream`, `Timeout`, `Decode`,
/// `UnsupportedEnvironment`) are caught by the session and degraded one
/// level before they can end a session; only `Precondition` failures and
/// internal channel breakdowns are terminal.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Missing credential or invalid configuration. The session never starts.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A vendor call failed. `status` is set when the failure carried an
    /// HTTP status; WebSocket and SDK-internal failures leave it unset.
    #[error("upstream call failed{}: {body}", fmt_status(.status))]
    Upstream { status: Option<u16>, body: String },

    /// Synthesized audio could not be decoded. Malformed audio will not
    /// become valid on retry, so this is reported rather than retried.
    #[error("audio decode failed: {0}")]
    Decode(String),

    /// A generation or synthesis call did not resolve within the bound.
    /// Treated like `Upstream` by the degradation policy.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// On-device synthesis is unavailable on this build or host.
    #[error("local synthesis unavailable: {0}")]
    UnsupportedEnvironment(String),

    /// An internal channel between session components closed unexpectedly.
    #[error("session channel closed: {0}")]
    ChannelClosed(String),
}

impl SessionError {
    /// Shorthand for an upstream error with an HTTP status code.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        SessionError::Upstream {
            status: Some(status),
            body: body.into(),
        }
    }

    /// Shorthand for an upstream error with no HTTP status (WS, SDK).
    pub fn upstream_opaque(body: impl Into<String>) -> Self {
        SessionError::Upstream {
            status: None,
            body: body.into(),
        }
    }

    /// True for failures the degradation ladder absorbs by moving to the
    /// next provider; false for failures that must stop the session.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            SessionError::Upstream { .. }
                | SessionError::Timeout(_)
                | SessionError::Decode(_)
                | SessionError::UnsupportedEnvironment(_)
        )
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" with status {code}"),
        None => String::new(),
    }
}
