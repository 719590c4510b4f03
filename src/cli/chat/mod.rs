pub mod conversation_state;
pub mod language;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod voice;

use std::io::Write;
use std::process::ExitCode;

use chrono::Local;
use color_print::cformat;
use conversation_state::{ConversationHistory, Role};
use eyre::{Result, bail, eyre};
use language::Language;
use orchestrator::ConversationOrchestrator;
use parser::TutorResponse;
use prompt::generate_prompt;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use tracing::{error, info, warn};
use voice::VoiceSession;

use crate::cli::quiz::QuizRunner;
use crate::quiz::{self, QuizSession};

/// Questions asked for when a quiz is generated on a topic.
pub const GENERATED_QUIZ_SIZE: usize = 5;

const RIGHT_TO_LEFT_EMBEDDING: char = '\u{202B}';
const POP_DIRECTIONAL_FORMATTING: char = '\u{202C}';

const COMMANDS_TEXT: &str = "
Things to try
• Explain formative vs summative assessment.
• What does Bloom's taxonomy say about higher-order thinking?
• /quiz for a practice quiz, or /quiz <topic> for a fresh one

/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Exam Tutor

/clear              Start the conversation over
/history            Show the conversation so far
/language <name>    Switch to english, arabic or hindi (starts over)
/followup <n>       Ask the n-th suggested follow-up question
/voice              Ask a question out loud and hear the answer
/speak              Read the last answer aloud
/stop               Stop reading aloud
/quiz [topic]       Practice quiz, generated on a topic if one is given
/help               Show this help dialogue
/quit               Quit the application
";

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    history: ConversationHistory,
    orchestrator: ConversationOrchestrator,
    voice: VoiceSession,
    last_response: Option<TutorResponse>,
    editor: Option<Editor<()>>,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        orchestrator: ConversationOrchestrator,
        voice: VoiceSession,
        language: Language,
    ) -> Self {
        Self {
            output,
            input,
            interactive,
            history: ConversationHistory::new(language),
            orchestrator,
            voice,
            last_response: None,
            editor: None,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        if !self.orchestrator.backend().is_configured() {
            writeln!(
                self.output,
                "{}",
                cformat!("<yellow>OpenAI API key not found.</yellow> Set OPENAI_API_KEY to chat; quizzes still work.")
            )?;
        }

        // Handle non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            if let Err(e) = self.handle_input(&input).await {
                writeln!(self.output, "Error: {}", e)?;
                return Ok(ExitCode::FAILURE);
            }
            return Ok(ExitCode::SUCCESS);
        }

        if self.interactive {
            self.print_welcome()?;
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    /// Run one quiz and exit.
    pub async fn run_quiz_only(&mut self, topic: Option<&str>, count: usize) -> Result<ExitCode> {
        self.editor = Some(prompt::rl()?);
        match self.run_quiz(topic, count).await {
            Ok(()) => Ok(ExitCode::SUCCESS),
            Err(e) => {
                writeln!(self.output, "Error: {}", e)?;
                Ok(ExitCode::FAILURE)
            }
        }
    }

    fn print_welcome(&mut self) -> Result<()> {
        let welcome = self.welcome_text();
        writeln!(self.output, "\n{}", cformat!("<green>Tutor:</green> {}", welcome))?;
        writeln!(self.output, "{}", COMMANDS_TEXT)?;
        if self.voice.can_listen() {
            writeln!(self.output, "Voice input is ready: type /voice and speak.")?;
        } else if let Some(reason) = self.voice.capture_unavailable_reason() {
            info!("Voice input unavailable: {}", reason);
        }
        if let Some(reason) = self.voice.output_unavailable_reason() {
            info!("Speech output unavailable: {}", reason);
        }
        Ok(())
    }

    fn welcome_text(&self) -> String {
        let welcome = &self.history.messages()[0];
        directional(welcome.content(), welcome.language())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        self.editor = Some(prompt::rl()?);

        loop {
            if let Some(error) = self.voice.take_last_error() {
                writeln!(self.output, "{}", cformat!("<yellow>{}</yellow>", error))?;
            }

            let prompt_text = generate_prompt(self.history.language(), self.voice.state());
            let Some(editor) = self.editor.as_mut() else {
                break;
            };
            let readline = editor.readline(&prompt_text);

            match readline {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    editor.add_history_entry(line.as_str());

                    if line.trim() == "/quit" {
                        break;
                    }

                    if let Err(e) = self.handle_input(&line).await {
                        // already part of the reported error
                        self.voice.take_last_error();
                        writeln!(self.output, "Error: {}", e)?;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        self.voice.stop_speaking();
        Ok(())
    }

    pub async fn handle_input(&mut self, input: &str) -> Result<()> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(());
        }

        let (command, argument) = match input.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, argument.trim()),
            None => (input, ""),
        };

        match command {
            "/help" => {
                writeln!(self.output, "{}", HELP_TEXT)?;
            }
            "/clear" => {
                self.history.clear();
                self.last_response = None;
                writeln!(self.output, "Conversation cleared.")?;
            }
            "/history" => {
                self.print_history()?;
            }
            "/language" | "/lang" => {
                let language = argument.parse::<Language>().map_err(|e| eyre!(e))?;
                self.change_language(language)?;
            }
            "/followup" => {
                self.ask_follow_up(argument).await?;
            }
            "/voice" => {
                self.voice_turn().await?;
            }
            "/speak" => {
                let Some(message) = self.history.last_assistant_message() else {
                    bail!("Nothing to read aloud yet");
                };
                let text = message.content().to_string();
                self.voice.speak(&text)?;
            }
            "/stop" => {
                self.voice.stop_speaking();
            }
            "/quiz" => {
                let topic = (!argument.is_empty()).then_some(argument);
                self.run_quiz(topic, GENERATED_QUIZ_SIZE).await?;
            }
            _ if command.starts_with('/') => {
                bail!("Unknown command {}. Type /help to see what is available", command);
            }
            _ => {
                self.text_turn(input).await?;
            }
        }

        Ok(())
    }

    fn change_language(&mut self, language: Language) -> Result<()> {
        self.voice.stop_speaking();
        self.voice.set_language(language);
        self.history.reset(language);
        self.last_response = None;
        info!("Switched tutoring language to {}", language);

        let welcome = self.welcome_text();
        writeln!(self.output, "{}", cformat!("<green>Tutor:</green> {}", welcome))?;
        Ok(())
    }

    fn print_history(&mut self) -> Result<()> {
        writeln!(
            self.output,
            "Conversation in {} ({} messages)",
            self.history.language(),
            self.history.len()
        )?;
        for message in self.history.messages() {
            let time = message.timestamp().with_timezone(&Local).format("%H:%M:%S");
            let speaker = match message.role() {
                Role::User => "You",
                Role::Assistant => "Tutor",
                Role::System => "System",
            };
            let content = directional(message.content(), message.language());
            writeln!(self.output, "[{}] {}: {}", time, speaker, content)?;
        }
        Ok(())
    }

    async fn text_turn(&mut self, utterance: &str) -> Result<TutorResponse> {
        writeln!(self.output, "{}", cformat!("<dim>Processing...</dim>"))?;

        let response = self
            .orchestrator
            .submit_turn(&mut self.history, utterance)
            .await?;

        self.display_response(&response)?;
        self.last_response = Some(response.clone());
        Ok(response)
    }

    async fn ask_follow_up(&mut self, argument: &str) -> Result<()> {
        let index: usize = argument
            .parse()
            .map_err(|_| eyre!("Usage: /followup <number>"))?;

        let question = self
            .last_response
            .as_ref()
            .and_then(|response| response.follow_up_questions.get(index.wrapping_sub(1)))
            .cloned()
            .ok_or_else(|| eyre!("No follow-up question number {}", index))?;

        writeln!(self.output, "{}", cformat!("<bold>You:</bold> {}", question))?;
        self.text_turn(&question).await?;
        Ok(())
    }

    async fn voice_turn(&mut self) -> Result<()> {
        self.voice.stop_speaking();
        writeln!(self.output, "{}", cformat!("<red>●</red> Listening..."))?;

        let utterance = match self.voice.listen().await {
            Ok(Some(utterance)) => utterance,
            Ok(None) => {
                let heard = self.voice.transcript();
                if heard.is_empty() {
                    writeln!(self.output, "No speech captured.")?;
                } else {
                    writeln!(self.output, "No speech captured (only heard \"{}\").", heard)?;
                }
                return Ok(());
            }
            Err(e) => {
                warn!("Capture failed: {}", e);
                return Err(e.into());
            }
        };

        writeln!(self.output, "{}", cformat!("<bold>Recognized:</bold> {}", utterance))?;
        if let Some(error) = self.voice.take_last_error() {
            // capture broke off after some text was already final
            writeln!(self.output, "{}", cformat!("<yellow>{}</yellow>", error))?;
        }
        let result = self.text_turn(&utterance).await;
        self.voice.reset_transcript();
        let response = result?;

        if self.voice.can_speak() {
            if let Err(e) = self.voice.speak(&response.answer) {
                error!("Failed to speak answer: {}", e);
                writeln!(self.output, "{}", e)?;
            }
        }
        Ok(())
    }

    fn display_response(&mut self, response: &TutorResponse) -> Result<()> {
        let language = self.history.language();
        let answer = directional(&response.answer, language);
        writeln!(self.output, "{}", cformat!("<green>Tutor:</green> {}", answer))?;
        writeln!(self.output)?;
        writeln!(self.output, "{}", cformat!("<dim>Follow-up questions (/followup N):</dim>"))?;
        for (i, question) in response.follow_up_questions.iter().enumerate() {
            writeln!(self.output, "  {}. {}", i + 1, directional(question, language))?;
        }
        Ok(())
    }

    async fn run_quiz(&mut self, topic: Option<&str>, count: usize) -> Result<()> {
        let language = self.history.language();

        let mut questions = match topic {
            Some(topic) => {
                writeln!(self.output, "Generating a quiz on {}...", topic)?;
                match quiz::generate_questions(
                    self.orchestrator.backend().as_ref(),
                    topic,
                    language,
                    count,
                )
                .await
                {
                    Ok(questions) => questions,
                    Err(e) => {
                        warn!("Quiz generation failed: {}", e);
                        writeln!(self.output, "{}", e)?;
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        if questions.is_empty() {
            if topic.is_some() {
                writeln!(
                    self.output,
                    "Could not generate questions, using the practice set instead."
                )?;
            }
            questions = quiz::sample_questions(language)?;
        }

        let session = QuizSession::new(questions)?;

        let Self { output, editor, .. } = self;
        let Some(editor) = editor.as_mut() else {
            bail!("The quiz needs an interactive terminal");
        };

        let mut runner = QuizRunner::new(output.as_mut(), session);
        runner.run(|prompt| match editor.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        })?;
        Ok(())
    }
}

/// Wrap right-to-left text in a bidi embedding so terminals lay it out in
/// reading order.
fn directional(text: &str, language: Language) -> String {
    if language.is_rtl() {
        format!("{}{}{}", RIGHT_TO_LEFT_EMBEDDING, text, POP_DIRECTIONAL_FORMATTING)
    } else {
        text.to_string()
    }
}
