mod cli;
mod config;
mod error;
mod openai_client;
mod quiz;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::language::Language;
use crate::cli::chat::orchestrator::ConversationOrchestrator;
use crate::cli::chat::voice::command::{CommandCapture, CommandSpeaker};
use crate::cli::chat::voice::{Capability, SpeechCapture, SpeechOutput, VoiceSession};
use crate::cli::chat::ChatContext;
use crate::config::TutorConfig;
use crate::openai_client::OpenAiClient;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Question to ask the tutor
    #[arg(short, long)]
    input: Option<String>,

    /// Tutoring language
    #[arg(short, long, value_enum)]
    language: Option<Language>,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Never read answers aloud
    #[arg(long, global = true)]
    no_speech: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a tutoring session
    Chat {
        /// Question to ask the tutor
        #[arg(short, long)]
        input: Option<String>,

        /// Tutoring language
        #[arg(short, long, value_enum)]
        language: Option<Language>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Take a practice quiz
    Quiz {
        /// Generate questions on this topic instead of the practice set
        #[arg(short, long)]
        topic: Option<String>,

        /// Number of questions to generate
        #[arg(short, long, default_value_t = 5)]
        count: usize,

        /// Quiz language
        #[arg(short, long, value_enum)]
        language: Option<Language>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let verbose = match &cli.command {
        Some(Commands::Chat { verbose, .. }) => *verbose || cli.verbose,
        _ => cli.verbose,
    };

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Exam Tutor");

    let config = TutorConfig::load(cli.config.as_deref())?;
    let backend = Arc::new(OpenAiClient::new(
        config.api_key.clone(),
        config.endpoint.clone(),
        config.model.clone(),
    ));
    let orchestrator = ConversationOrchestrator::new(backend);

    match cli.command {
        Some(Commands::Quiz { topic, count, language }) => {
            let language = language.or(cli.language).unwrap_or(config.language);
            let mut chat_context = ChatContext::new(
                Box::new(io::stdout()),
                None,
                true,
                orchestrator,
                VoiceSession::text_only(language),
                language,
            );
            chat_context.run_quiz_only(topic.as_deref(), count).await
        }
        Some(Commands::Chat { input, language, .. }) => {
            let language = language.or(cli.language).unwrap_or(config.language);
            let voice = voice_session(&config, cli.no_speech, language);
            let mut chat_context = ChatContext::new(
                Box::new(io::stdout()),
                input.or(cli.input),
                true,
                orchestrator,
                voice,
                language,
            );
            chat_context.run().await
        }
        None => {
            // Default to chat if no subcommand is provided
            let language = cli.language.unwrap_or(config.language);
            let voice = voice_session(&config, cli.no_speech, language);
            let mut chat_context = ChatContext::new(
                Box::new(io::stdout()),
                cli.input,
                true,
                orchestrator,
                voice,
                language,
            );
            chat_context.run().await
        }
    }
}

fn voice_session(config: &TutorConfig, no_speech: bool, language: Language) -> VoiceSession {
    let capture = CommandCapture::detect(config.capture_command.as_deref())
        .map(|capture| Box::new(capture) as Box<dyn SpeechCapture>);

    let output = if no_speech || !config.speech_output {
        Capability::Unavailable("Text-to-Speech disabled".to_string())
    } else {
        CommandSpeaker::detect().map(|speaker| Box::new(speaker) as Box<dyn SpeechOutput>)
    };

    if let Some(reason) = output.unavailable_reason() {
        debug!("Speech output unavailable: {}", reason);
    }

    VoiceSession::new(capture, output, language)
}
