use std::env;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{
    Capability, CaptureEvent, RecognitionErrorKind, SpeechCapture, SpeechEvent, SpeechOutput,
};
use crate::error::{Result, TutorError};

/// Words per minute, a little under the engines' default.
const SPEECH_RATE: &str = "160";

/// Prefix of a dictation output line that reports a failure code instead of text.
const CAPTURE_ERROR_PREFIX: &str = "error:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeakerKind {
    Espeak,
    Say,
}

/// Speech output through a synthesizer binary found on `PATH`
/// (`espeak-ng`, `espeak` or macOS `say`).
pub struct CommandSpeaker {
    program: PathBuf,
    kind: SpeakerKind,
    cancel: Option<oneshot::Sender<()>>,
}

impl CommandSpeaker {
    pub fn detect() -> Capability<CommandSpeaker> {
        let candidates = [
            ("espeak-ng", SpeakerKind::Espeak),
            ("espeak", SpeakerKind::Espeak),
            ("say", SpeakerKind::Say),
        ];

        for (name, kind) in candidates {
            if let Some(program) = find_on_path(name) {
                debug!("Using {} for speech output", program.display());
                return Capability::Available(CommandSpeaker {
                    program,
                    kind,
                    cancel: None,
                });
            }
        }

        Capability::Unavailable(
            "Text-to-Speech not supported here. Install espeak-ng to hear answers.".to_string(),
        )
    }

    fn command(&self, text: &str, locale: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        match self.kind {
            SpeakerKind::Espeak => {
                let voice = locale.split('-').next().unwrap_or("en").to_lowercase();
                cmd.arg("-v").arg(voice).arg("-s").arg(SPEECH_RATE);
            }
            SpeakerKind::Say => {
                cmd.arg("-r").arg(SPEECH_RATE);
            }
        }
        // answers such as "-5 is negative" must not be read as flags
        cmd.arg("--").arg(text);
        cmd
    }
}

impl SpeechOutput for CommandSpeaker {
    fn speak(
        &mut self,
        text: &str,
        locale: &str,
        events: UnboundedSender<SpeechEvent>,
    ) -> Result<()> {
        self.cancel();

        let mut child = self
            .command(text, locale)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TutorError::UnsupportedCapability(format!("Failed to start speech output: {}", e))
            })?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);
        let _ = events.send(SpeechEvent::Started);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let event = match status {
                        Ok(status) if status.success() => SpeechEvent::Ended,
                        Ok(status) => {
                            SpeechEvent::Error(format!("synthesizer exited with {}", status))
                        }
                        Err(e) => SpeechEvent::Error(e.to_string()),
                    };
                    let _ = events.send(event);
                }
                _ = cancel_rx => {
                    debug!("Speech output cancelled");
                    let _ = events.send(SpeechEvent::Ended);
                }
            }
            // dropping the child kills a cancelled synthesizer
        });

        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Speech capture through an external dictation command.
///
/// The command runs under `sh -c` with `EXAM_TUTOR_LOCALE` set to the
/// session locale. Each non-empty line it prints is one final transcript
/// segment, except `error: <code>` lines which report a recognition failure
/// (`no-speech`, `audio-capture`, `network`, ...). The session ends when the
/// command exits.
pub struct CommandCapture {
    command: String,
    cancel: Option<oneshot::Sender<()>>,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cancel: None,
        }
    }

    pub fn detect(command: Option<&str>) -> Capability<CommandCapture> {
        match command.map(str::trim).filter(|c| !c.is_empty()) {
            Some(command) => Capability::Available(CommandCapture::new(command)),
            None => Capability::Unavailable(
                "Speech recognition not supported here. Set EXAM_TUTOR_CAPTURE_COMMAND to a dictation command to enable voice input."
                    .to_string(),
            ),
        }
    }
}

impl SpeechCapture for CommandCapture {
    fn start(&mut self, locale: &str, events: UnboundedSender<CaptureEvent>) -> Result<()> {
        self.stop();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("EXAM_TUTOR_LOCALE", locale)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TutorError::Recognition(RecognitionErrorKind::Other(e.to_string())))?;

        let Some(stdout) = child.stdout.take() else {
            return Err(TutorError::Recognition(RecognitionErrorKind::AudioCapture));
        };

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);
        let _ = events.send(CaptureEvent::Started);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(event) = capture_event(&line) {
                                let _ = events.send(event);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Failed to read dictation output: {}", e);
                            let _ = events
                                .send(CaptureEvent::Error(RecognitionErrorKind::AudioCapture));
                            break;
                        }
                    },
                    _ = &mut cancel_rx => {
                        debug!("Capture session stopped");
                        let _ = events.send(CaptureEvent::Ended);
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if !status.success() => {
                    let _ = events.send(CaptureEvent::Error(RecognitionErrorKind::Other(format!(
                        "dictation command exited with {}",
                        status
                    ))));
                }
                Err(e) => {
                    let kind = RecognitionErrorKind::Other(e.to_string());
                    let _ = events.send(CaptureEvent::Error(kind));
                }
                Ok(_) => {}
            }
            let _ = events.send(CaptureEvent::Ended);
        });

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

fn capture_event(line: &str) -> Option<CaptureEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(code) = line.strip_prefix(CAPTURE_ERROR_PREFIX) {
        return Some(CaptureEvent::Error(RecognitionErrorKind::from_code(code.trim())));
    }
    Some(CaptureEvent::Result {
        transcript: line.to_string(),
        is_final: true,
    })
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::chat::language::Language;
    use crate::cli::chat::voice::VoiceSession;

    #[test]
    fn capture_needs_a_command() {
        assert!(!CommandCapture::detect(None).is_available());
        assert!(!CommandCapture::detect(Some("   ")).is_available());
        assert!(CommandCapture::detect(Some("whisper-dictate")).is_available());
    }

    #[tokio::test]
    async fn dictation_lines_become_the_utterance() {
        let capture = CommandCapture::new("echo \"$EXAM_TUTOR_LOCALE\"; echo what is pedagogy");
        let mut session = VoiceSession::new(
            Capability::Available(Box::new(capture)),
            Capability::Unavailable("no tts".into()),
            Language::Hindi,
        );

        let utterance = session.listen().await.unwrap();
        assert_eq!(utterance.as_deref(), Some("hi-IN what is pedagogy"));
    }

    #[tokio::test]
    async fn failing_dictation_command_is_a_recognition_error() {
        let capture = CommandCapture::new("exit 3");
        let mut session = VoiceSession::new(
            Capability::Available(Box::new(capture)),
            Capability::Unavailable("no tts".into()),
            Language::English,
        );

        let err = session.listen().await.unwrap_err();
        assert!(matches!(err, TutorError::Recognition(RecognitionErrorKind::Other(_))));
    }

    #[tokio::test]
    async fn dictation_error_lines_map_to_recognition_errors() {
        let capture = CommandCapture::new("echo 'error: no-speech'");
        let mut session = VoiceSession::new(
            Capability::Available(Box::new(capture)),
            Capability::Unavailable("no tts".into()),
            Language::English,
        );

        let err = session.listen().await.unwrap_err();
        assert!(matches!(err, TutorError::Recognition(RecognitionErrorKind::NoSpeech)));
    }

    #[test]
    fn spoken_text_follows_end_of_options() {
        for kind in [SpeakerKind::Espeak, SpeakerKind::Say] {
            let speaker = CommandSpeaker {
                program: PathBuf::from("/usr/bin/true"),
                kind,
                cancel: None,
            };
            let cmd = speaker.command("-5 is negative", "ar-SA");
            let args: Vec<_> = cmd.as_std().get_args().collect();
            assert_eq!(&args[args.len() - 2..], ["--", "-5 is negative"]);
        }
    }
}
