use std::sync::Arc;

use tracing::{debug, info, warn};

use super::conversation_state::{ConversationHistory, Role};
use super::language::Language;
use super::parser::{parse_response, TutorResponse};
use crate::error::{Result, TutorError};
use crate::openai_client::{ChatMessage, CompletionBackend, CompletionRequest, SamplingParams};

/// Prior messages sent along with a new question.
pub const CONTEXT_WINDOW: usize = 10;

/// A turn that has been assembled but not yet applied to the history.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    utterance: String,
    language: Language,
    generation: u64,
    messages: Vec<ChatMessage>,
}

/// A turn that did not make it. The history was left as it was.
#[derive(Debug)]
pub struct TurnFailure {
    pub utterance: String,
    pub error: TutorError,
}

/// Turns student utterances into completion requests and folds the replies
/// back into the conversation.
pub struct ConversationOrchestrator {
    backend: Arc<dyn CompletionBackend>,
}

impl ConversationOrchestrator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    /// Run a full turn. On success the history gains the user message and
    /// the assistant answer; on failure it is untouched.
    pub async fn submit_turn(
        &self,
        history: &mut ConversationHistory,
        utterance: &str,
    ) -> Result<TutorResponse> {
        let pending = self.begin_turn(history, utterance);
        match self.dispatch(&pending).await {
            Ok(response) => {
                Self::complete_turn(history, pending, &response)?;
                Ok(response)
            }
            Err(error) => {
                let failure = Self::fail_turn(pending, error);
                warn!("Turn failed for {:?}: {}", failure.utterance, failure.error);
                Err(failure.error)
            }
        }
    }

    pub fn begin_turn(&self, history: &ConversationHistory, utterance: &str) -> PendingTurn {
        let language = history.language();
        PendingTurn {
            utterance: utterance.to_string(),
            language,
            generation: history.generation(),
            messages: build_messages(history, utterance, language),
        }
    }

    /// One attempt against the remote model. Does not touch any history.
    pub async fn dispatch(&self, pending: &PendingTurn) -> Result<TutorResponse> {
        if !self.backend.is_configured() {
            warn!("No API credential configured; skipping completion request");
            return Err(TutorError::RemoteUnavailable);
        }

        let request = CompletionRequest {
            model: self.backend.model().to_string(),
            messages: pending.messages.clone(),
            temperature: SamplingParams::CHAT.temperature,
            max_tokens: SamplingParams::CHAT.max_tokens,
        };

        info!(
            "Submitting turn with {} context messages in {}",
            pending.messages.len().saturating_sub(2),
            pending.language
        );

        let raw = self.backend.complete(&request).await?;
        let response = parse_response(&raw);
        debug!(
            "Parsed answer of {} chars with {} follow-ups",
            response.answer.len(),
            response.follow_up_questions.len()
        );
        Ok(response)
    }

    pub fn complete_turn(
        history: &mut ConversationHistory,
        pending: PendingTurn,
        response: &TutorResponse,
    ) -> Result<()> {
        if history.generation() != pending.generation || history.language() != pending.language {
            warn!("Dropping reply for a conversation that was reset");
            return Err(TutorError::StaleTurn);
        }

        history.push_user(&pending.utterance);
        history.push_assistant(&response.answer);
        Ok(())
    }

    pub fn fail_turn(pending: PendingTurn, error: TutorError) -> TurnFailure {
        TurnFailure {
            utterance: pending.utterance,
            error,
        }
    }
}

/// System prompt, then the last [`CONTEXT_WINDOW`] real messages, then the
/// new question. The welcome placeholder never goes out.
pub fn build_messages(
    history: &ConversationHistory,
    utterance: &str,
    language: Language,
) -> Vec<ChatMessage> {
    let prior: Vec<_> = history
        .messages()
        .iter()
        .filter(|message| !message.is_welcome())
        .collect();
    let start = prior.len().saturating_sub(CONTEXT_WINDOW);

    let mut messages = Vec::with_capacity(CONTEXT_WINDOW + 2);
    messages.push(ChatMessage::new(Role::System, language.system_prompt()));
    messages.extend(
        prior[start..]
            .iter()
            .map(|message| ChatMessage::new(message.role(), message.content())),
    );
    messages.push(ChatMessage::new(Role::User, utterance));
    messages
}
