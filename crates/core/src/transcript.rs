//! Append-only record of everything said during a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Interviewer,
    Candidate,
}

/// One utterance, timestamped at the moment it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub spoken_at: DateTime<Utc>,
}

/// Ordered history of a session. Entries can only be appended; nothing is
/// ever edited or removed, so indices handed out earlier stay valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an utterance and returns its index in the history.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> usize {
        self.turns.push(Turn {
            role,
            content: content.into(),
            spoken_at: Utc::now(),
        });
        self.turns.len() - 1
    }

    pub fn all(&self) -> &[Turn] {
        &self.turns
    }

    /// Last `n` turns in chronological order, for generation context.
    pub fn recent_window(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of interviewer utterances so far. This is the elapsed-turn
    /// counter the pacing policy runs on.
    pub fn interviewer_turns(&self) -> u32 {
        self.turns.iter().filter(|t| t.role == Role::Interviewer).count() as u32
    }

    pub fn last_candidate_reply(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Candidate)
            .map(|t| t.content.as_str())
    }

    /// Renders turns as "Interviewer: ..." / "Candidate: ..." lines for
    /// inclusion in a generation prompt.
    pub fn dialogue_lines(turns: &[Turn]) -> String {
        let mut out = String::new();
        for turn in turns {
            let label = match turn.role {
                Role::Interviewer => "Interviewer",
                Role::Candidate => "Candidate",
            };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&turn.content);
            out.push('\n');
        }
        out
    }
}
