use rustyline::{Config, Editor, Result};

use super::language::Language;
use super::voice::VoiceState;

/// Prompt showing the tutoring language and, while speech plays, a marker.
pub fn generate_prompt(language: Language, voice_state: VoiceState) -> String {
    let speaking = match voice_state {
        VoiceState::Speaking => " ♪",
        VoiceState::Listening | VoiceState::Idle => "",
    };
    format!("[{}{}] > ", language, speaking)
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(rustyline::CompletionType::List)
        .build();
    Editor::with_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_language() {
        assert_eq!(generate_prompt(Language::Hindi, VoiceState::Idle), "[hindi] > ");
        assert_eq!(generate_prompt(Language::English, VoiceState::Speaking), "[english ♪] > ");
    }
}
