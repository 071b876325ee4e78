//! Session planning: categories, difficulty tiers, turn budgets and the
//! pacing policy that decides when an interview wraps up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Interview styles with distinct question banks and prompt framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterviewCategory {
    Hr,
    Technical,
    Behavioral,
}

impl InterviewCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewCategory::Hr => "hr",
            InterviewCategory::Technical => "technical",
            InterviewCategory::Behavioral => "behavioral",
        }
    }
}

impl fmt::Display for InterviewCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterviewCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hr" => Ok(InterviewCategory::Hr),
            "technical" => Ok(InterviewCategory::Technical),
            "behavioral" => Ok(InterviewCategory::Behavioral),
            other => Err(format!(
                "unknown interview category '{other}' (expected hr, technical or behavioral)"
            )),
        }
    }
}

/// Seniority tier the questions are pitched at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Difficulty {
    Junior,
    Mid,
    Senior,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Junior => "junior",
            Difficulty::Mid => "mid",
            Difficulty::Senior => "senior",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "junior" => Ok(Difficulty::Junior),
            "mid" => Ok(Difficulty::Mid),
            "senior" => Ok(Difficulty::Senior),
            other => Err(format!(
                "unknown difficulty '{other}' (expected junior, mid or senior)"
            )),
        }
    }
}

/// Optional candidate background, owned by the caller and read-only here.
/// Fed verbatim into generation prompts when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    pub name: Option<String>,
    pub target_role: Option<String>,
    pub background: Option<String>,
}

impl CandidateProfile {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.target_role.is_none() && self.background.is_none()
    }
}

/// What a session was asked to be: category, tier and how many interviewer
/// turns it gets before the pacing policy forces wrap-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlan {
    pub category: InterviewCategory,
    pub difficulty: Difficulty,
    pub turn_budget: u32,
}

impl SessionPlan {
    pub fn new(category: InterviewCategory, difficulty: Difficulty, turn_budget: u32) -> Self {
        Self {
            category,
            difficulty,
            turn_budget,
        }
    }

    /// Derives the turn budget from a requested duration, one interviewer
    /// question per two minutes, never less than one.
    pub fn from_duration(
        category: InterviewCategory,
        difficulty: Difficulty,
        duration_minutes: u32,
    ) -> Self {
        Self::new(category, difficulty, (duration_minutes / 2).max(1))
    }
}

/// Whether the conversation should keep going after a generated turn.
///
/// The derived ordering is load-bearing: `Continue < WrapUp < Complete`, so
/// clamping a generator's verdict against the budget floor is a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContinuationVerdict {
    Continue,
    WrapUp,
    Complete,
}

/// Where in the interview arc the next turn falls. Generators use this to
/// shape the question (opening pleasantries vs. a closing line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnPhase {
    Opening,
    Followup,
    WrapUp,
    Closing,
}

/// Minimum verdict the budget imposes on a turn generated after
/// `asked_turns` interviewer turns have already been spoken.
pub fn forced_floor(asked_turns: u32, turn_budget: u32) -> ContinuationVerdict {
    if asked_turns >= turn_budget {
        ContinuationVerdict::Complete
    } else if asked_turns + 1 == turn_budget {
        ContinuationVerdict::WrapUp
    } else {
        ContinuationVerdict::Continue
    }
}

/// Clamps a generator's verdict against the budget floor. A generator may
/// end the session earlier than the budget requires, never later.
pub fn enforce_budget(
    verdict: ContinuationVerdict,
    asked_turns: u32,
    turn_budget: u32,
) -> ContinuationVerdict {
    verdict.max(forced_floor(asked_turns, turn_budget))
}

/// Phase of the turn that would be generated next.
pub fn phase_for(asked_turns: u32, turn_budget: u32) -> TurnPhase {
    match forced_floor(asked_turns, turn_budget) {
        ContinuationVerdict::Complete => TurnPhase::Closing,
        ContinuationVerdict::WrapUp => TurnPhase::WrapUp,
        ContinuationVerdict::Continue if asked_turns == 0 => TurnPhase::Opening,
        ContinuationVerdict::Continue => TurnPhase::Followup,
    }
}
