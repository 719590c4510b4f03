use thiserror::Error;

use crate::cli::chat::voice::RecognitionErrorKind;

/// Errors surfaced by the tutor core.
///
/// Every variant renders as a message fit to show the student directly; the
/// chat loop prints them and keeps going.
#[derive(Debug, Error)]
pub enum TutorError {
    /// No API credential is configured. Raised before any request is made.
    #[error("OpenAI API key not found. Please set OPENAI_API_KEY environment variable.")]
    RemoteUnavailable,

    /// The completion endpoint answered with an error, or could not be reached,
    /// or returned something that is not a completion payload.
    #[error("OpenAI API error: {0}")]
    RemoteRequestFailed(String),

    /// A speech capability is missing from this environment.
    #[error("{0}")]
    UnsupportedCapability(String),

    /// Capture session ended with a recognition failure.
    #[error("{}", .0.user_message())]
    Recognition(RecognitionErrorKind),

    #[error("voice is busy: {0}")]
    VoiceBusy(&'static str),

    /// The history was reset while the turn was in flight.
    #[error("conversation was reset before the reply arrived")]
    StaleTurn,

    #[error("quiz error: {0}")]
    Quiz(String),
}

pub type Result<T> = std::result::Result<T, TutorError>;
