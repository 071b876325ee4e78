//! Turn generation.
//!
//! Two interchangeable backends produce interviewer turns: a deterministic
//! scripted question bank and a generative backend calling an
//! OpenAI-compatible chat model. The session orchestrator substitutes the
//! scripted output whenever the generative backend is unavailable or fails.

pub mod generative;
pub mod script;

pub use generative::GenerativeGenerator;
pub use script::ScriptedGenerator;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::interview::{
    CandidateProfile, ContinuationVerdict, Difficulty, InterviewCategory, TurnPhase,
};
use crate::transcript::Turn;

/// Everything a backend needs to produce the next interviewer turn.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub category: InterviewCategory,
    pub difficulty: Difficulty,
    /// Where in the interview arc this turn falls.
    pub phase: TurnPhase,
    /// Interviewer turns already spoken before this one.
    pub turn_index: u32,
    /// Recent transcript window, chronological.
    pub recent_turns: Vec<Turn>,
    pub profile: Option<CandidateProfile>,
}

/// A generated interviewer turn plus the backend's continuation opinion.
///
/// The verdict here is advisory; the session clamps it against the turn
/// budget before acting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedTurn {
    pub text: String,
    pub verdict: ContinuationVerdict,
}

/// Contract for anything that can play the interviewer.
#[async_trait]
pub trait TurnGenerator: Send + Sync {
    /// Backend label for logs.
    fn name(&self) -> &'static str;

    /// Whether this backend can be used at all. Reflects credential
    /// presence only, never transient network health.
    fn is_available(&self) -> bool;

    /// Produces the next interviewer turn for the given context.
    async fn next_turn(&self, ctx: &TurnContext) -> Result<GeneratedTurn, SessionError>;

    /// Produces the end-of-session feedback summary from the transcript.
    async fn closing_summary(&self, turns: &[Turn]) -> Result<String, SessionError>;
}
