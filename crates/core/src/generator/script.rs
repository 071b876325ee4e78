//! Deterministic fallback interviewer backed by fixed question banks.

use async_trait::async_trait;

use crate::error::SessionError;
use crate::generator::{GeneratedTurn, TurnContext, TurnGenerator};
use crate::interview::{ContinuationVerdict, InterviewCategory, TurnPhase};
use crate::transcript::{Role, Turn};

const HR_QUESTIONS: &[&str] = &[
    "Why are you interested in this role?",
    "Where do you see yourself in five years?",
    "What motivates you to do your best work?",
    "What kind of team environment do you work best in?",
    "Why are you looking to leave your current position?",
    "What would your previous manager say is your biggest strength?",
];

const TECHNICAL_QUESTIONS: &[&str] = &[
    "Walk me through a system you designed end to end and the trade-offs you made.",
    "How do you approach debugging a production incident under time pressure?",
    "Tell me about a time you had to make a slow service fast. What did you measure first?",
    "When would you choose consistency over availability in a distributed system?",
    "How do you decide what to test, and at which level, for a new feature?",
    "How would you design a rate limiter for a public API?",
];

const BEHAVIORAL_QUESTIONS: &[&str] = &[
    "Tell me about a time you strongly disagreed with a teammate. How did it resolve?",
    "Describe a situation where you missed a deadline. What happened afterwards?",
    "Give me an example of leading a change without having formal authority.",
    "Tell me about a failure that taught you something you still use today.",
    "Describe a time you had to deliver difficult feedback to a colleague.",
    "Tell me about a project where the requirements kept shifting under you.",
];

const WRAP_UP_LINE: &str = "We're coming up on time. Before we finish, is there anything \
     we haven't covered that you'd like me to know, or anything you'd like to ask me?";

const CLOSING_LINE: &str = "Thank you for your time today, it was a pleasure talking with \
     you. That's everything from my side; we'll be in touch about next steps. Goodbye!";

fn opening_line(category: InterviewCategory) -> &'static str {
    match category {
        InterviewCategory::Hr => {
            "Thanks for making the time today. To get us started, tell me a bit \
             about yourself and what drew you to this opportunity."
        }
        InterviewCategory::Technical => {
            "Welcome, good to meet you. Let's dive straight in: walk me through \
             your background and the technical work you're most proud of."
        }
        InterviewCategory::Behavioral => {
            "Thanks for joining. I'll be asking about concrete situations from \
             your experience today. First, tell me briefly about your current role."
        }
    }
}

fn question_bank(category: InterviewCategory) -> &'static [&'static str] {
    match category {
        InterviewCategory::Hr => HR_QUESTIONS,
        InterviewCategory::Technical => TECHNICAL_QUESTIONS,
        InterviewCategory::Behavioral => BEHAVIORAL_QUESTIONS,
    }
}

/// Question-bank interviewer. Always available, never fails, and always
/// votes to continue; the session's budget policy decides when to stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedGenerator;

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Picks the scripted line for a turn without the async ceremony.
    /// The session also calls this directly when substituting for a failed
    /// generative turn.
    pub fn line_for(&self, ctx: &TurnContext) -> String {
        match ctx.phase {
            TurnPhase::Opening => opening_line(ctx.category).to_string(),
            TurnPhase::WrapUp => WRAP_UP_LINE.to_string(),
            TurnPhase::Closing => CLOSING_LINE.to_string(),
            TurnPhase::Followup => {
                let bank = question_bank(ctx.category);
                // Wraparound keeps long sessions supplied with questions.
                bank[ctx.turn_index as usize % bank.len()].to_string()
            }
        }
    }
}

#[async_trait]
impl TurnGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn next_turn(&self, ctx: &TurnContext) -> Result<GeneratedTurn, SessionError> {
        Ok(GeneratedTurn {
            text: self.line_for(ctx),
            verdict: ContinuationVerdict::Continue,
        })
    }

    async fn closing_summary(&self, turns: &[Turn]) -> Result<String, SessionError> {
        let answered = turns.iter().filter(|t| t.role == Role::Candidate).count();
        Ok(format!(
            "Practice session complete. You answered {answered} question{plural}. \
             Read back through the transcript and look for answers that ran long \
             or stayed abstract; tightening those with a concrete example is the \
             fastest way to improve.",
            plural = if answered == 1 { "" } else { "s" }
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::Difficulty;

    fn ctx(phase: TurnPhase, turn_index: u32) -> TurnContext {
        TurnContext {
            category: InterviewCategory::Technical,
            difficulty: Difficulty::Mid,
            phase,
            turn_index,
            recent_turns: Vec::new(),
            profile: None,
        }
    }

    #[tokio::test]
    async fn followups_index_the_bank_with_wraparound() {
        let r#gen = ScriptedGenerator::new();
        let bank_len = TECHNICAL_QUESTIONS.len() as u32;

        let early = r#gen.next_turn(&ctx(TurnPhase::Followup, 2)).await.unwrap();
        let wrapped = r#gen
            .next_turn(&ctx(TurnPhase::Followup, 2 + bank_len))
            .await
            .unwrap();

        assert_eq!(early.text, TECHNICAL_QUESTIONS[2]);
        assert_eq!(early.text, wrapped.text);
        assert_eq!(early.verdict, ContinuationVerdict::Continue);
    }

    #[tokio::test]
    async fn phases_get_dedicated_lines() {
        let r#gen = ScriptedGenerator::new();

        let opening = r#gen.next_turn(&ctx(TurnPhase::Opening, 0)).await.unwrap();
        let wrap = r#gen.next_turn(&ctx(TurnPhase::WrapUp, 3)).await.unwrap();
        let closing = r#gen.next_turn(&ctx(TurnPhase::Closing, 4)).await.unwrap();

        assert!(opening.text.contains("Welcome"));
        assert_eq!(wrap.text, WRAP_UP_LINE);
        assert_eq!(closing.text, CLOSING_LINE);
        // Scripted output never votes to end; the budget policy does that.
        assert_eq!(wrap.verdict, ContinuationVerdict::Continue);
    }

    #[tokio::test]
    async fn summary_counts_candidate_answers() {
        let r#gen = ScriptedGenerator::new();
        let mut transcript = crate::transcript::Transcript::new();
        transcript.append(Role::Interviewer, "q1");
        transcript.append(Role::Candidate, "a1");
        transcript.append(Role::Interviewer, "q2");
        transcript.append(Role::Candidate, "a2");

        let summary = r#gen.closing_summary(transcript.all()).await.unwrap();
        assert!(summary.contains("answered 2 questions"));
    }
}
