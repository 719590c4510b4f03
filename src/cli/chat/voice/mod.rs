pub mod command;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use super::language::Language;
use crate::error::{Result, TutorError};

/// Outcome of probing the host for a speech feature, decided once up front.
pub enum Capability<T> {
    Available(T),
    Unavailable(String),
}

impl<T> Capability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Capability::Available(_) => None,
            Capability::Unavailable(reason) => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Capability<U> {
        match self {
            Capability::Available(handle) => Capability::Available(f(handle)),
            Capability::Unavailable(reason) => Capability::Unavailable(reason),
        }
    }

    fn get_mut(&mut self) -> Result<&mut T> {
        match self {
            Capability::Available(handle) => Ok(handle),
            Capability::Unavailable(reason) => {
                Err(TutorError::UnsupportedCapability(reason.clone()))
            }
        }
    }
}

/// Why a capture session failed. Every kind ends the session; the student
/// can start a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    NoSpeech,
    AudioCapture,
    Network,
    PermissionDenied,
    NotAllowed,
    Other(String),
}

impl RecognitionErrorKind {
    /// Map an engine error code (`no-speech`, `audio-capture`, ...) to a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => Self::NoSpeech,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            "permission-denied" => Self::PermissionDenied,
            "not-allowed" => Self::NotAllowed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::NoSpeech => "No speech detected. Please try again.".to_string(),
            Self::AudioCapture => {
                "No microphone found. Ensure your microphone is connected.".to_string()
            }
            Self::Network => "Network error. Please check your connection.".to_string(),
            Self::PermissionDenied => {
                "Microphone access denied. Please allow microphone access in your system settings."
                    .to_string()
            }
            Self::NotAllowed => "Please allow microphone access when prompted.".to_string(),
            Self::Other(code) => format!("Speech recognition error: {}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Started,
    Result { transcript: String, is_final: bool },
    Error(RecognitionErrorKind),
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Started,
    Ended,
    Error(String),
}

/// A speech recognition engine.
///
/// `start` opens one session and reports progress through `events`. The
/// engine sends `Ended` when the session is over, including after `stop`.
pub trait SpeechCapture: Send {
    fn start(&mut self, locale: &str, events: UnboundedSender<CaptureEvent>) -> Result<()>;

    fn stop(&mut self);
}

/// A speech synthesis engine.
///
/// `speak` replaces whatever is being spoken; it never queues.
pub trait SpeechOutput: Send {
    fn speak(
        &mut self,
        text: &str,
        locale: &str,
        events: UnboundedSender<SpeechEvent>,
    ) -> Result<()>;

    fn cancel(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Listening,
    Speaking,
}

enum CaptureOutcome {
    Transcribed(String),
    Silent,
    Failed(RecognitionErrorKind),
}

/// Drives capture and output for one student.
///
/// Listening and speaking never overlap: starting capture while either is
/// active is refused, and each new utterance cancels the previous one.
pub struct VoiceSession {
    capture: Capability<Box<dyn SpeechCapture>>,
    output: Capability<Box<dyn SpeechOutput>>,
    language: Language,
    state: VoiceState,
    final_transcript: String,
    transcript: String,
    last_error: Option<String>,
    capture_events: Option<UnboundedReceiver<CaptureEvent>>,
    speech_events: Option<UnboundedReceiver<SpeechEvent>>,
}

impl VoiceSession {
    pub fn new(
        capture: Capability<Box<dyn SpeechCapture>>,
        output: Capability<Box<dyn SpeechOutput>>,
        language: Language,
    ) -> Self {
        Self {
            capture,
            output,
            language,
            state: VoiceState::Idle,
            final_transcript: String::new(),
            transcript: String::new(),
            last_error: None,
            capture_events: None,
            speech_events: None,
        }
    }

    /// Session with neither capability, for text-only use.
    pub fn text_only(language: Language) -> Self {
        Self::new(
            Capability::Unavailable("Speech recognition disabled".to_string()),
            Capability::Unavailable("Text-to-Speech disabled".to_string()),
            language,
        )
    }

    pub fn can_listen(&self) -> bool {
        self.capture.is_available()
    }

    pub fn can_speak(&self) -> bool {
        self.output.is_available()
    }

    pub fn capture_unavailable_reason(&self) -> Option<&str> {
        self.capture.unavailable_reason()
    }

    pub fn output_unavailable_reason(&self) -> Option<&str> {
        self.output.unavailable_reason()
    }

    /// Later sessions and utterances use the new locale.
    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    pub fn state(&mut self) -> VoiceState {
        self.drain_speech_events();
        self.state
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn reset_transcript(&mut self) {
        self.transcript.clear();
        self.final_transcript.clear();
    }

    /// The most recent capture or speech error, cleared once read.
    pub fn take_last_error(&mut self) -> Option<String> {
        self.drain_speech_events();
        self.last_error.take()
    }

    /// Open a capture session.
    pub fn start_listening(&mut self) -> Result<()> {
        self.drain_speech_events();
        match self.state {
            VoiceState::Listening => return Err(TutorError::VoiceBusy("already listening")),
            VoiceState::Speaking => return Err(TutorError::VoiceBusy("speech output in progress")),
            VoiceState::Idle => {}
        }

        let locale = self.language.locale_tag();
        let capture = self.capture.get_mut().map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        capture.start(locale, tx)?;
        debug!("Capture session started for {}", locale);

        self.capture_events = Some(rx);
        self.state = VoiceState::Listening;
        self.last_error = None;
        self.transcript.clear();
        self.final_transcript.clear();
        Ok(())
    }

    pub fn stop_listening(&mut self) {
        if let Capability::Available(capture) = &mut self.capture {
            capture.stop();
        }
        if self.state == VoiceState::Listening {
            self.state = VoiceState::Idle;
        }
    }

    /// Capture one utterance.
    ///
    /// Returns `Ok(None)` when the session ended without any final text.
    pub async fn listen(&mut self) -> Result<Option<String>> {
        self.start_listening()?;

        let Some(mut events) = self.capture_events.take() else {
            return Ok(None);
        };

        while let Some(event) = events.recv().await {
            match self.handle_capture_event(event) {
                Some(CaptureOutcome::Transcribed(text)) => return Ok(Some(text)),
                Some(CaptureOutcome::Silent) => return Ok(None),
                Some(CaptureOutcome::Failed(kind)) => return Err(TutorError::Recognition(kind)),
                None => {}
            }
        }

        // the engine went away without saying goodbye
        warn!("Capture engine closed its event channel without ending the session");
        Ok(self.finish_capture())
    }

    fn handle_capture_event(&mut self, event: CaptureEvent) -> Option<CaptureOutcome> {
        match event {
            CaptureEvent::Started => {
                self.state = VoiceState::Listening;
                self.last_error = None;
                None
            }
            CaptureEvent::Result {
                transcript,
                is_final,
            } => {
                if is_final {
                    self.final_transcript.push_str(&transcript);
                    self.final_transcript.push(' ');
                    self.transcript = self.final_transcript.trim_end().to_string();
                } else if self.final_transcript.is_empty() {
                    self.transcript = transcript;
                }
                None
            }
            CaptureEvent::Error(kind) => {
                self.stop_listening();
                self.last_error = Some(kind.user_message());
                // text finalized before the failure still counts
                Some(match self.finish_capture() {
                    Some(text) => CaptureOutcome::Transcribed(text),
                    None => CaptureOutcome::Failed(kind),
                })
            }
            CaptureEvent::Ended => Some(match self.finish_capture() {
                Some(text) => CaptureOutcome::Transcribed(text),
                None => CaptureOutcome::Silent,
            }),
        }
    }

    fn finish_capture(&mut self) -> Option<String> {
        self.state = VoiceState::Idle;
        let text = self.final_transcript.trim();
        if text.is_empty() {
            return None;
        }
        self.transcript = text.to_string();
        Some(self.transcript.clone())
    }

    /// Speak `text`, cutting off anything still being spoken.
    pub fn speak(&mut self, text: &str) -> Result<()> {
        self.drain_speech_events();
        if self.state == VoiceState::Listening {
            return Err(TutorError::VoiceBusy("still listening"));
        }

        let locale = self.language.locale_tag();
        let output = self.output.get_mut().map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        output.cancel();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(err) = output.speak(text, locale, tx) {
            self.last_error = Some(err.to_string());
            self.state = VoiceState::Idle;
            return Err(err);
        }

        self.speech_events = Some(rx);
        self.state = VoiceState::Speaking;
        self.last_error = None;
        Ok(())
    }

    pub fn stop_speaking(&mut self) {
        if let Capability::Available(output) = &mut self.output {
            output.cancel();
        }
        self.speech_events = None;
        if self.state == VoiceState::Speaking {
            self.state = VoiceState::Idle;
        }
    }

    fn drain_speech_events(&mut self) {
        let Some(events) = self.speech_events.as_mut() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            match event {
                SpeechEvent::Started => {
                    self.state = VoiceState::Speaking;
                }
                SpeechEvent::Ended => {
                    self.state = VoiceState::Idle;
                }
                SpeechEvent::Error(error) => {
                    warn!("Speech output failed: {}", error);
                    self.last_error = Some(format!("Text-to-Speech error: {}", error));
                    self.state = VoiceState::Idle;
                }
            }
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop_listening();
        self.stop_speaking();
    }
}
