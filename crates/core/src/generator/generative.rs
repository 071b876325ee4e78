//! Generative interviewer backed by an OpenAI-compatible chat model.
//!
//! The model plays the interviewer and is asked to end every reply with a
//! control marker (`[CONTINUE]`, `[WRAP_UP]` or `[COMPLETE]`) so the session
//! can read its continuation opinion without a second call. Failures here
//! never end a session; the orchestrator substitutes the scripted backend
//! for the affected turn.

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tokio::time::timeout;

use crate::credentials::{CredentialKind, CredentialProvider};
use crate::error::SessionError;
use crate::generator::{GeneratedTurn, TurnContext, TurnGenerator};
use crate::interview::{ContinuationVerdict, TurnPhase};
use crate::transcript::{Role, Transcript, Turn};

/// Bound on a single generation round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Trailing markers the model is instructed to emit, most final first.
const MARKERS: &[(&str, ContinuationVerdict)] = &[
    ("[COMPLETE]", ContinuationVerdict::Complete),
    ("[WRAP_UP]", ContinuationVerdict::WrapUp),
    ("[CONTINUE]", ContinuationVerdict::Continue),
];

impl From<OpenAIError> for SessionError {
    fn from(e: OpenAIError) -> Self {
        match e {
            OpenAIError::ApiError(api) => SessionError::Upstream {
                status: None,
                body: api.message,
            },
            other => SessionError::Upstream {
                status: None,
                body: other.to_string(),
            },
        }
    }
}

/// Interviewer driven by chat completions against any OpenAI-compatible API.
pub struct GenerativeGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    call_timeout: Duration,
    available: bool,
}

impl GenerativeGenerator {
    /// Wires the backend up against a credential provider. Availability is
    /// decided here, once: a missing generation credential makes the backend
    /// permanently unavailable for this session.
    pub fn new(
        credentials: &dyn CredentialProvider,
        api_base: Option<&str>,
        model: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        let key = credentials.credential(CredentialKind::Generation);
        let mut config = OpenAIConfig::new();
        if let Some(key) = key {
            config = config.with_api_key(key);
        }
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: model.into(),
            call_timeout,
            available: key.is_some(),
        }
    }

    fn system_prompt(ctx: &TurnContext) -> String {
        let mut prompt = format!(
            "You are a professional interviewer running a {category} practice \
             interview pitched at a {difficulty}-level candidate. Stay in \
             character, keep your turns short and conversational, and ask one \
             question at a time.",
            category = ctx.category,
            difficulty = ctx.difficulty,
        );

        if let Some(profile) = ctx.profile.as_ref().filter(|p| !p.is_empty()) {
            prompt.push_str("\n\nCandidate background:");
            if let Some(name) = &profile.name {
                prompt.push_str(&format!("\n- Name: {name}"));
            }
            if let Some(role) = &profile.target_role {
                prompt.push_str(&format!("\n- Target role: {role}"));
            }
            if let Some(background) = &profile.background {
                prompt.push_str(&format!("\n- Background: {background}"));
            }
        }

        prompt.push_str("\n\n");
        prompt.push_str(phase_instruction(ctx.phase));
        prompt.push_str(
            "\n\nEnd your reply with exactly one marker: [CONTINUE] while the \
             interview should proceed, [WRAP_UP] when your next question should \
             be the last, or [COMPLETE] when the interview is over.",
        );
        prompt
    }

    fn build_messages(
        ctx: &TurnContext,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(Self::system_prompt(ctx))
                .build()?
                .into(),
        ];

        for turn in &ctx.recent_turns {
            let message: ChatCompletionRequestMessage = match turn.role {
                Role::Interviewer => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                Role::Candidate => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }

        // Chat endpoints want something to respond to on the very first turn.
        if ctx.recent_turns.is_empty() {
            messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content("The candidate has joined the call. Begin the interview.")
                    .build()?
                    .into(),
            );
        }

        Ok(messages)
    }

    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, SessionError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;

        let response = timeout(self.call_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| SessionError::Timeout(self.call_timeout))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(SessionError::upstream_opaque(
                "completion contained no turn text",
            ));
        }
        Ok(content)
    }
}

#[async_trait]
impl TurnGenerator for GenerativeGenerator {
    fn name(&self) -> &'static str {
        "generative"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn next_turn(&self, ctx: &TurnContext) -> Result<GeneratedTurn, SessionError> {
        let messages = Self::build_messages(ctx)?;
        let raw = self.complete(messages).await?;
        let (text, verdict) = split_control_marker(&raw);
        if text.is_empty() {
            return Err(SessionError::upstream_opaque(
                "completion contained only a control marker",
            ));
        }
        Ok(GeneratedTurn { text, verdict })
    }

    async fn closing_summary(&self, turns: &[Turn]) -> Result<String, SessionError> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(
                    "You are an interview coach. The transcript of a practice \
                     interview follows. Give the candidate concise, direct \
                     feedback: two or three strengths and two or three things to \
                     improve, each tied to a specific answer. Keep it under 180 \
                     words.",
                )
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(Transcript::dialogue_lines(turns))
                .build()?
                .into(),
        ];
        self.complete(messages).await
    }
}

fn phase_instruction(phase: TurnPhase) -> &'static str {
    match phase {
        TurnPhase::Opening => {
            "Open the interview with a brief greeting and your first question."
        }
        TurnPhase::Followup => {
            "Ask your next question. Build on what the candidate has said, and \
             follow up if their last answer was thin."
        }
        TurnPhase::WrapUp => {
            "Time is nearly up. Ask one final wrap-up question and make clear \
             the interview is coming to an end."
        }
        TurnPhase::Closing => {
            "Time is up. Give a brief, courteous closing statement. Do not ask \
             another question."
        }
    }
}

/// Splits a trailing control marker off the model's reply. Absent or
/// unrecognized markers default to `Continue`.
fn split_control_marker(raw: &str) -> (String, ContinuationVerdict) {
    let trimmed = raw.trim();
    for (marker, verdict) in MARKERS {
        if let Some(stripped) = trimmed.strip_suffix(marker) {
            return (stripped.trim_end().to_string(), *verdict);
        }
    }
    (trimmed.to_string(), ContinuationVerdict::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::interview::{Difficulty, InterviewCategory};

    fn ctx_with_history(recent_turns: Vec<Turn>) -> TurnContext {
        TurnContext {
            category: InterviewCategory::Behavioral,
            difficulty: Difficulty::Senior,
            phase: TurnPhase::Followup,
            turn_index: 1,
            recent_turns,
            profile: None,
        }
    }

    #[test]
    fn marker_is_stripped_and_classified() {
        let (text, verdict) =
            split_control_marker("Great, tell me more about that. [CONTINUE]");
        assert_eq!(text, "Great, tell me more about that.");
        assert_eq!(verdict, ContinuationVerdict::Continue);

        let (text, verdict) = split_control_marker("Any last questions for me?\n[WRAP_UP]");
        assert_eq!(text, "Any last questions for me?");
        assert_eq!(verdict, ContinuationVerdict::WrapUp);

        let (text, verdict) = split_control_marker("Thanks, goodbye! [COMPLETE]");
        assert_eq!(text, "Thanks, goodbye!");
        assert_eq!(verdict, ContinuationVerdict::Complete);
    }

    #[test]
    fn missing_marker_defaults_to_continue() {
        let (text, verdict) = split_control_marker("Why did you pick that stack?");
        assert_eq!(text, "Why did you pick that stack?");
        assert_eq!(verdict, ContinuationVerdict::Continue);

        // Markers are only honored at the very end of the reply.
        let (text, verdict) = split_control_marker("[COMPLETE] is a marker we use.");
        assert_eq!(text, "[COMPLETE] is a marker we use.");
        assert_eq!(verdict, ContinuationVerdict::Continue);
    }

    #[test]
    fn availability_follows_credential_presence() {
        let with_key = StaticCredentials::new().with(CredentialKind::Generation, "sk-x");
        let r#gen = GenerativeGenerator::new(&with_key, None, "gpt-4o-mini", DEFAULT_TIMEOUT);
        assert!(r#gen.is_available());

        let without_key = StaticCredentials::new();
        let r#gen = GenerativeGenerator::new(&without_key, None, "gpt-4o-mini", DEFAULT_TIMEOUT);
        assert!(!r#gen.is_available());
    }

    #[test]
    fn history_maps_to_chat_roles() {
        let mut transcript = Transcript::new();
        transcript.append(Role::Interviewer, "Tell me about a conflict.");
        transcript.append(Role::Candidate, "Last quarter I disagreed with...");

        let messages =
            GenerativeGenerator::build_messages(&ctx_with_history(transcript.all().to_vec()))
                .unwrap();

        assert_eq!(messages.len(), 3);
        assert!(matches!(
            messages[0],
            ChatCompletionRequestMessage::System(_)
        ));
        assert!(matches!(
            messages[1],
            ChatCompletionRequestMessage::Assistant(_)
        ));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn empty_history_gets_a_kickoff_message() {
        let messages = GenerativeGenerator::build_messages(&ctx_with_history(Vec::new())).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }
}
