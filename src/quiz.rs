use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::cli::chat::conversation_state::Role;
use crate::cli::chat::language::Language;
use crate::error::{Result, TutorError};
use crate::openai_client::{ChatMessage, CompletionBackend, CompletionRequest, SamplingParams};

pub const OPTIONS_PER_QUESTION: usize = 4;

const QUESTION_BANK: &str = include_str!("../data/quiz.json");

static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").expect("valid JSON array pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl QuizQuestion {
    pub fn is_valid(&self) -> bool {
        !self.question.trim().is_empty()
            && self.options.len() == OPTIONS_PER_QUESTION
            && self.correct_answer < self.options.len()
    }

    pub fn correct_option(&self) -> &str {
        &self.options[self.correct_answer]
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct QuestionBank {
    english: Vec<QuizQuestion>,
    arabic: Vec<QuizQuestion>,
    hindi: Vec<QuizQuestion>,
}

/// The built-in practice questions for `language`.
pub fn sample_questions(language: Language) -> Result<Vec<QuizQuestion>> {
    let mut bank: QuestionBank = serde_json::from_str(QUESTION_BANK)
        .map_err(|e| TutorError::Quiz(format!("question bank is malformed: {}", e)))?;

    let questions = match language {
        Language::English => std::mem::take(&mut bank.english),
        Language::Arabic => std::mem::take(&mut bank.arabic),
        Language::Hindi => std::mem::take(&mut bank.hindi),
    };

    if let Some(bad) = questions.iter().find(|q| !q.is_valid()) {
        return Err(TutorError::Quiz(format!(
            "question {} in the {} bank is invalid",
            bad.id, language
        )));
    }

    Ok(questions)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Excellent,
    Good,
    Passing,
    KeepStudying,
}

impl Grade {
    pub fn label(self) -> &'static str {
        match self {
            Grade::Excellent => "Excellent!",
            Grade::Good => "Good Job!",
            Grade::Passing => "Passing Score!",
            Grade::KeepStudying => "Keep Studying!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    pub correct: usize,
    pub total: usize,
}

impl QuizScore {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64 * 100.0
    }

    pub fn grade(&self) -> Grade {
        let percentage = self.percentage();
        if percentage >= 90.0 {
            Grade::Excellent
        } else if percentage >= 80.0 {
            Grade::Good
        } else if percentage >= 60.0 {
            Grade::Passing
        } else {
            Grade::KeepStudying
        }
    }
}

/// One line of the post-quiz review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewItem<'a> {
    pub question: &'a QuizQuestion,
    pub selected: Option<usize>,
    pub is_correct: bool,
}

/// Walks a student through a fixed list of questions.
///
/// Moving forward requires answering the current question, and submitting
/// requires answering all of them.
#[derive(Debug, Clone)]
pub struct QuizSession {
    questions: Vec<QuizQuestion>,
    current: usize,
    selected: Vec<Option<usize>>,
}

impl QuizSession {
    pub fn new(questions: Vec<QuizQuestion>) -> Result<Self> {
        if questions.is_empty() {
            return Err(TutorError::Quiz("there are no questions to ask".to_string()));
        }
        let selected = vec![None; questions.len()];
        Ok(Self {
            questions,
            current: 0,
            selected,
        })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> &QuizQuestion {
        &self.questions[self.current]
    }

    pub fn selected_for_current(&self) -> Option<usize> {
        self.selected[self.current]
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 == self.questions.len()
    }

    pub fn answered_count(&self) -> usize {
        self.selected.iter().filter(|s| s.is_some()).count()
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.answered_count()
    }

    pub fn select_answer(&mut self, option: usize) -> Result<()> {
        let available = self.current_question().options.len();
        if option >= available {
            return Err(TutorError::Quiz(format!(
                "choose an option between 1 and {}",
                available
            )));
        }
        self.selected[self.current] = Some(option);
        Ok(())
    }

    pub fn next(&mut self) -> Result<()> {
        if self.selected_for_current().is_none() {
            return Err(TutorError::Quiz("select an answer first".to_string()));
        }
        if self.is_last() {
            return Err(TutorError::Quiz("this is the last question".to_string()));
        }
        self.current += 1;
        Ok(())
    }

    pub fn previous(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        true
    }

    pub fn submit(&mut self) -> Result<QuizScore> {
        let remaining = self.remaining();
        if remaining > 0 {
            return Err(TutorError::Quiz(format!(
                "{} remaining questions to answer",
                remaining
            )));
        }

        let correct = self
            .questions
            .iter()
            .zip(&self.selected)
            .filter(|(question, selected)| **selected == Some(question.correct_answer))
            .count();
        let score = QuizScore {
            correct,
            total: self.questions.len(),
        };
        info!("Quiz submitted: {}/{}", score.correct, score.total);
        Ok(score)
    }

    pub fn retake(&mut self) {
        self.current = 0;
        self.selected = vec![None; self.questions.len()];
    }

    pub fn review(&self) -> Vec<ReviewItem<'_>> {
        self.questions
            .iter()
            .zip(&self.selected)
            .map(|(question, selected)| ReviewItem {
                question,
                selected: *selected,
                is_correct: *selected == Some(question.correct_answer),
            })
            .collect()
    }
}

/// Ask the model for `count` fresh questions on `topic`.
///
/// Output that cannot be read as questions gives an empty list rather than an
/// error; questions that do not have exactly four options and a valid answer
/// index are dropped.
pub async fn generate_questions(
    backend: &dyn CompletionBackend,
    topic: &str,
    language: Language,
    count: usize,
) -> Result<Vec<QuizQuestion>> {
    if !backend.is_configured() {
        return Err(TutorError::RemoteUnavailable);
    }

    let prompt = format!(
        "Generate {} multiple choice questions on the topic \"{}\" in {} suitable for exam preparation.\n\
         Format each question as JSON with fields: id, question, options (array of 4 strings), correctAnswer (0-3 index).",
        count, topic, language
    );

    let request = CompletionRequest {
        model: backend.model().to_string(),
        messages: vec![ChatMessage::new(Role::User, prompt)],
        temperature: SamplingParams::QUIZ.temperature,
        max_tokens: SamplingParams::QUIZ.max_tokens,
    };

    info!("Generating {} quiz questions on {:?}", count, topic);
    let content = backend.complete(&request).await?;
    Ok(extract_questions(&content))
}

/// Pull the question array out of a model reply that may wrap it in prose or
/// code fences.
pub fn extract_questions(content: &str) -> Vec<QuizQuestion> {
    let json = JSON_ARRAY
        .find(content)
        .map(|m| m.as_str())
        .unwrap_or("[]");

    let values: Vec<serde_json::Value> = match serde_json::from_str(json) {
        Ok(values) => values,
        Err(e) => {
            warn!("Failed to parse questions JSON: {}", e);
            debug!("Unparseable question payload: {}", content);
            return Vec::new();
        }
    };

    values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<QuizQuestion>(value).ok())
        .filter(QuizQuestion::is_valid)
        .enumerate()
        .map(|(index, mut question)| {
            if question.id.trim().is_empty() {
                question.id = (index + 1).to_string();
            }
            question
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::openai_client::tests::MockBackend;

    fn session() -> QuizSession {
        QuizSession::new(sample_questions(Language::English).unwrap()).unwrap()
    }

    fn answer_all(session: &mut QuizSession, choose: impl Fn(&QuizQuestion) -> usize) {
        loop {
            let option = choose(session.current_question());
            session.select_answer(option).unwrap();
            if session.is_last() {
                break;
            }
            session.next().unwrap();
        }
    }

    #[test]
    fn every_language_has_five_valid_questions() {
        for language in Language::ALL {
            let questions = sample_questions(language).unwrap();
            assert_eq!(questions.len(), 5, "{language}");
            assert!(questions.iter().all(QuizQuestion::is_valid));
        }
    }

    #[test]
    fn next_requires_an_answer() {
        let mut session = session();
        assert!(session.next().is_err());
        session.select_answer(0).unwrap();
        session.next().unwrap();
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn out_of_range_option_is_rejected() {
        let mut session = session();
        assert!(session.select_answer(4).is_err());
        assert_eq!(session.selected_for_current(), None);
    }

    #[test]
    fn submit_requires_every_answer() {
        let mut session = session();
        session.select_answer(1).unwrap();
        let err = session.submit().unwrap_err();
        assert_eq!(err.to_string(), "quiz error: 4 remaining questions to answer");
    }

    #[test]
    fn perfect_run_is_excellent() {
        let mut session = session();
        answer_all(&mut session, |q| q.correct_answer);

        let score = session.submit().unwrap();
        assert_eq!(score, QuizScore { correct: 5, total: 5 });
        assert_eq!(score.grade(), Grade::Excellent);
        assert!(session.review().iter().all(|item| item.is_correct));
    }

    #[test]
    fn scoring_uses_exact_index_match() {
        let mut session = session();
        // every built-in answer is index 1 or 2, so index 0 is always wrong
        answer_all(&mut session, |_| 0);

        let score = session.submit().unwrap();
        assert_eq!(score.correct, 0);
        assert_eq!(score.grade(), Grade::KeepStudying);
        let review = session.review();
        assert_eq!(review[0].selected, Some(0));
        assert_eq!(
            review[0].question.correct_option(),
            "Encourages critical thinking and creativity"
        );
    }

    #[test]
    fn grade_thresholds() {
        let grade = |correct, total| QuizScore { correct, total }.grade();
        assert_eq!(grade(9, 10), Grade::Excellent);
        assert_eq!(grade(8, 10), Grade::Good);
        assert_eq!(grade(6, 10), Grade::Passing);
        assert_eq!(grade(3, 5), Grade::Passing);
        assert_eq!(grade(2, 5), Grade::KeepStudying);
        assert_eq!(QuizScore { correct: 0, total: 0 }.percentage(), 0.0);
    }

    #[test]
    fn retake_clears_answers() {
        let mut session = session();
        answer_all(&mut session, |q| q.correct_answer);
        session.submit().unwrap();

        session.retake();

        assert_eq!(session.current_index(), 0);
        assert_eq!(session.answered_count(), 0);
        assert!(session.submit().is_err());
    }

    #[test]
    fn previous_stops_at_first_question() {
        let mut session = session();
        assert!(!session.previous());
        session.select_answer(2).unwrap();
        session.next().unwrap();
        assert!(session.previous());
        assert_eq!(session.selected_for_current(), Some(2));
    }

    #[test]
    fn empty_question_list_is_rejected() {
        assert!(QuizSession::new(Vec::new()).is_err());
    }

    #[test]
    fn extracts_questions_from_fenced_reply() {
        let reply = r#"Here are your questions:
```json
[
  {"id": 1, "question": "What is NET?", "options": ["a","b","c","d"], "correctAnswer": 2},
  {"id": "2", "question": "Too few options", "options": ["a","b"], "correctAnswer": 0},
  {"question": "No id", "options": ["a","b","c","d"], "correctAnswer": 3, "explanation": "because"}
]
```"#;
        let questions = extract_questions(reply);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].id, "1");
        assert_eq!(questions[0].correct_answer, 2);
        assert_eq!(questions[1].id, "2");
        assert_eq!(questions[1].explanation.as_deref(), Some("because"));
    }

    #[test]
    fn garbage_reply_yields_no_questions() {
        assert!(extract_questions("I cannot do that.").is_empty());
        assert!(extract_questions("[not json]").is_empty());
    }

    #[tokio::test]
    async fn generation_sends_single_user_prompt() {
        let backend = Arc::new(MockBackend::replying(vec![Ok(
            r#"[{"id":"1","question":"Q?","options":["a","b","c","d"],"correctAnswer":1}]"#.into(),
        )]));

        let questions = generate_questions(backend.as_ref(), "Bloom's taxonomy", Language::Hindi, 3)
            .await
            .unwrap();

        assert_eq!(questions.len(), 1);
        let request = backend.last_request().unwrap();
        assert_eq!(request.max_tokens, 1500);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        let expected = "Generate 3 multiple choice questions on the topic \"Bloom's taxonomy\" in hindi";
        assert!(request.messages[0].content.starts_with(expected));
    }

    #[tokio::test]
    async fn generation_without_credential_makes_no_call() {
        let backend = MockBackend::unconfigured();
        let err = generate_questions(&backend, "pedagogy", Language::English, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::RemoteUnavailable));
        assert_eq!(backend.call_count(), 0);
    }
}
