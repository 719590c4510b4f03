use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Follow-ups offered when the model did not suggest any.
pub const DEFAULT_FOLLOW_UPS: [&str; 3] = [
    "What are the key points I should remember?",
    "Can you provide more examples?",
    "How does this relate to other topics?",
];

pub const MAX_FOLLOW_UPS: usize = 3;

static NUMBERED_QUESTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+\.\s*\?").expect("valid numbered question pattern"));

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]+\.|[-*])\s*").expect("valid list marker pattern"));

/// Structured reply for a single turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TutorResponse {
    pub answer: String,
    pub follow_up_questions: Vec<String>,
}

/// Split a raw completion into an answer and follow-up questions.
///
/// The model is asked to answer first and then list follow-ups under a
/// heading, but nothing enforces that. Lines up to the first heading-like line
/// form the answer; lines after it are follow-ups. Whatever is missing is
/// filled in: the whole text becomes the answer, and the defaults become the
/// follow-ups.
pub fn parse_response(raw: &str) -> TutorResponse {
    let mut answer = String::new();
    let mut follow_ups = Vec::new();
    let mut in_follow_ups = false;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if is_section_header(line) {
            in_follow_ups = true;
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        if in_follow_ups {
            let question = LIST_MARKER.replace(line, "");
            let question = question.trim();
            if !question.is_empty() {
                follow_ups.push(question.to_string());
            }
        } else {
            if !answer.is_empty() {
                answer.push(' ');
            }
            answer.push_str(line);
        }
    }

    if answer.is_empty() {
        answer = raw.trim().to_string();
    }

    if follow_ups.is_empty() {
        follow_ups = DEFAULT_FOLLOW_UPS.iter().map(|q| q.to_string()).collect();
    }
    follow_ups.truncate(MAX_FOLLOW_UPS);

    TutorResponse {
        answer,
        follow_up_questions: follow_ups,
    }
}

fn is_section_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("follow-up")
        || lower.contains("questions")
        || line.starts_with("Q:")
        || NUMBERED_QUESTION.is_match(line)
}
