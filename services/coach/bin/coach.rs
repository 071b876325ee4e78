//! Entrypoint for the `coach` interview-practice CLI.
//!
//! This binary is responsible for:
//! 1. Loading configuration and credentials from the environment.
//! 2. Wiring the turn generator, the speech fallback chain, and audio output.
//! 3. Driving one interview session as a terminal read loop.
//! 4. Printing the feedback summary and the transcript when it ends.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use viva_coach::config::Config;
use viva_coach::playback::{NullPlayback, PlaybackEngine, RodioPlayback};
use viva_coach::provider::batch::BatchTts;
use viva_coach::provider::local::LocalTts;
use viva_coach::provider::stream::StreamingTts;
use viva_coach::provider::{SpeechRouter, SpeechSynthesizer};
use viva_coach::session::{
    AvatarConfig, InterviewSession, InterviewerMode, SessionEvent, SessionParts, SessionState,
};
use viva_coach::voice::VoicePreference;
use viva_core::credentials::{CredentialKind, CredentialProvider, EnvCredentials};
use viva_core::generator::{GenerativeGenerator, ScriptedGenerator, TurnGenerator};
use viva_core::interview::{CandidateProfile, Difficulty, InterviewCategory, SessionPlan};

/// Practice a spoken interview against a synthesized interviewer.
#[derive(Debug, Parser)]
#[command(name = "coach", version, about)]
struct Cli {
    /// Interview category: hr, technical or behavioral.
    #[arg(long, default_value = "technical")]
    category: InterviewCategory,

    /// Question difficulty: junior, mid or senior.
    #[arg(long, default_value = "mid")]
    difficulty: Difficulty,

    /// Planned interview length in minutes; one question per two minutes.
    #[arg(long, default_value_t = 10)]
    minutes: u32,

    /// How the interviewer is delivered: voice, text or avatar.
    #[arg(long, default_value = "voice")]
    mode: InterviewerMode,

    /// Preferred interviewer accent, e.g. uk, us, au.
    #[arg(long)]
    accent: Option<String>,

    /// Your name, so the interviewer can address you.
    #[arg(long)]
    name: Option<String>,

    /// The role you are practicing for.
    #[arg(long)]
    role: Option<String>,
}

fn build_generator(config: &Config, credentials: &EnvCredentials) -> Arc<dyn TurnGenerator> {
    if credentials.has_credential(CredentialKind::Generation) {
        info!(model = %config.generation_model, "using the generative interviewer");
        Arc::new(GenerativeGenerator::new(
            credentials,
            config.generation_api_base.as_deref(),
            config.generation_model.clone(),
            config.call_timeout,
        ))
    } else {
        warn!("OPENAI_API_KEY is not set; questions come from the scripted bank");
        Arc::new(ScriptedGenerator::new())
    }
}

fn build_speech(config: &Config, credentials: &EnvCredentials) -> SpeechRouter {
    let mut backends: Vec<Arc<dyn SpeechSynthesizer>> = Vec::new();
    match BatchTts::new(
        credentials,
        &config.speech_api_base,
        &config.speech_model,
        config.speech_speed,
        config.call_timeout,
    ) {
        Ok(batch) => backends.push(Arc::new(batch)),
        Err(e) => warn!(error = %e, "batch speech unavailable"),
    }
    backends.push(Arc::new(LocalTts::new(config.speech_speed)));
    SpeechRouter::new(backends)
}

fn build_playback(mode: InterviewerMode) -> Arc<dyn PlaybackEngine> {
    if mode != InterviewerMode::Voice {
        return Arc::new(NullPlayback::new());
    }
    match RodioPlayback::new() {
        Ok(playback) => Arc::new(playback),
        Err(e) => {
            warn!(error = %e, "no audio output device; the session runs silent");
            Arc::new(NullPlayback::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    // --- 3. Wire the Session ---
    let credentials = EnvCredentials::from_env();
    let generator = build_generator(&config, &credentials);
    let speech = Arc::new(build_speech(&config, &credentials));
    let playback = build_playback(cli.mode);

    let streaming = config.stream_tts_url.as_deref().map(|url| {
        StreamingTts::new(
            &credentials,
            url,
            config.stream_voice_id.as_deref(),
            config.speech_speed,
            config.call_timeout,
        )
    });

    let avatar = if cli.mode == InterviewerMode::Avatar {
        let url = config.require_avatar_url().context("Avatar mode needs AVATAR_URL")?;
        Some(AvatarConfig {
            url: url.to_string(),
            token: credentials.credential(CredentialKind::Avatar).map(str::to_string),
            open_timeout: config.call_timeout,
        })
    } else {
        None
    };

    let profile = CandidateProfile {
        name: cli.name.clone(),
        target_role: cli.role.clone(),
        background: None,
    };
    let profile = (!profile.is_empty()).then_some(profile);

    let plan = SessionPlan::from_duration(cli.category, cli.difficulty, cli.minutes);
    let parts = SessionParts {
        generator,
        speech,
        streaming,
        avatar,
        playback,
        voice: VoicePreference { accent: cli.accent.clone(), language: config.voice_language.clone() },
        transcript_window: config.transcript_window,
    };
    let (mut session, mut events) = InterviewSession::new(plan, cli.mode, profile, parts);

    // --- 4. Run the Interview ---
    println!(
        "Starting a {} {} interview, about {} questions. Type your answers; /end finishes early.",
        cli.difficulty, cli.category, plan.turn_budget
    );
    session.start().await.context("Failed to start the interview")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut speech_lost_noted = false;

    loop {
        tokio::select! {
            maybe_line = lines.next_line() => {
                let Some(line) = maybe_line.context("Failed to read stdin")? else {
                    session.end().await;
                    break;
                };
                let line = line.trim().to_string();
                if line == "/end" {
                    session.end().await;
                    break;
                }
                if let Err(e) = session.submit_reply(&line).await {
                    warn!(error = %e, "reply not accepted");
                }
                if session.state() == SessionState::Ended {
                    break;
                }
            }
            Some(event) = events.recv() => {
                match event {
                    SessionEvent::InterviewerTurn { text } => {
                        println!();
                        println!("interviewer> {text}");
                    }
                    SessionEvent::PlaybackFinished => {
                        session.playback_done().await;
                        match session.state() {
                            SessionState::Listening | SessionState::WrappingUp => {
                                print!("you> ");
                                std::io::stdout().flush().ok();
                            }
                            SessionState::Ended | SessionState::Failed => break,
                            _ => {}
                        }
                    }
                    SessionEvent::SpeechLost if !speech_lost_noted => {
                        speech_lost_noted = true;
                        println!("(the interviewer's voice is unavailable; continuing in text)");
                    }
                    SessionEvent::SessionFailed { reason } => {
                        eprintln!("session failed: {reason}");
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.end().await;
                break;
            }
        }
    }

    // --- 5. Feedback and Transcript ---
    if let Some(summary) = session.summary() {
        println!();
        println!("--- feedback ---");
        println!("{summary}");
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    Ok(())
}
