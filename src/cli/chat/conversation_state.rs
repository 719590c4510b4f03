use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::language::Language;

/// Id of the synthetic welcome entry. It is shown to the student but never
/// sent to the model.
pub const WELCOME_MESSAGE_ID: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the conversation. Fields are read-only once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
    language: Language,
}

impl Message {
    fn new(id: String, role: Role, content: &str, language: Language) -> Self {
        Self {
            id,
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            language,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_welcome(&self) -> bool {
        self.role == Role::Assistant && self.id == WELCOME_MESSAGE_ID
    }
}

/// Ordered conversation for the current session.
///
/// Starts with one welcome entry and grows by exactly one user and one
/// assistant message per completed turn. A reset replaces everything and bumps
/// the generation so in-flight turns can tell they are stale.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    language: Language,
    generation: u64,
    next_id: u64,
}

impl ConversationHistory {
    pub fn new(language: Language) -> Self {
        Self {
            messages: vec![Self::welcome(language)],
            language,
            generation: 0,
            next_id: 2,
        }
    }

    fn welcome(language: Language) -> Message {
        Message::new(
            WELCOME_MESSAGE_ID.to_string(),
            Role::Assistant,
            language.welcome_message(),
            language,
        )
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub(crate) fn push_user(&mut self, content: &str) -> &Message {
        self.push(Role::User, content)
    }

    pub(crate) fn push_assistant(&mut self, content: &str) -> &Message {
        self.push(Role::Assistant, content)
    }

    fn push(&mut self, role: Role, content: &str) -> &Message {
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.messages.push(Message::new(id, role, content, self.language));
        &self.messages[self.messages.len() - 1]
    }

    /// Drop everything and start over with a welcome in `language`.
    pub fn reset(&mut self, language: Language) {
        self.messages = vec![Self::welcome(language)];
        self.language = language;
        self.generation += 1;
        self.next_id = 2;
    }

    /// Same language, fresh conversation.
    pub fn clear(&mut self) {
        self.reset(self.language);
    }
}
