use std::io::Write;

use color_print::cformat;
use eyre::Result;

use crate::quiz::{QuizScore, QuizSession};

const QUIZ_HELP: &str = "Type 1-4 to answer, 'p' to go back, 'q' to leave the quiz.";
const RETAKE_PROMPT: &str = "Type 'r' to retake the quiz, anything else to finish.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizFlow {
    Continue,
    Finished(QuizScore),
    Quit,
}

/// Terminal front end for a [`QuizSession`].
pub struct QuizRunner<'a> {
    output: &'a mut dyn Write,
    session: QuizSession,
}

impl<'a> QuizRunner<'a> {
    pub fn new(output: &'a mut dyn Write, session: QuizSession) -> Self {
        Self { output, session }
    }

    /// Ask questions until the quiz is submitted and not retaken, the student
    /// quits, or `read_line` runs dry.
    pub fn run<F>(&mut self, mut read_line: F) -> Result<Option<QuizScore>>
    where
        F: FnMut(&str) -> Result<Option<String>>,
    {
        writeln!(self.output, "{}", QUIZ_HELP)?;
        self.render_question()?;

        loop {
            let Some(line) = read_line("answer> ")? else {
                return Ok(None);
            };
            match self.handle_line(&line)? {
                QuizFlow::Continue => {}
                QuizFlow::Finished(score) => {
                    self.render_results(score)?;
                    writeln!(self.output, "{}", RETAKE_PROMPT)?;
                    match read_line("> ")? {
                        Some(line) if line.trim().eq_ignore_ascii_case("r") => {
                            self.session.retake();
                            self.render_question()?;
                        }
                        _ => return Ok(Some(score)),
                    }
                }
                QuizFlow::Quit => {
                    writeln!(self.output, "Quiz abandoned.")?;
                    return Ok(None);
                }
            }
        }
    }

    pub fn handle_line(&mut self, line: &str) -> Result<QuizFlow> {
        match line.trim().to_lowercase().as_str() {
            "" => Ok(QuizFlow::Continue),
            "q" | "quit" => Ok(QuizFlow::Quit),
            "p" | "prev" | "previous" => {
                if !self.session.previous() {
                    writeln!(self.output, "Already at the first question.")?;
                }
                self.render_question()?;
                Ok(QuizFlow::Continue)
            }
            choice => {
                let Ok(number) = choice.parse::<usize>() else {
                    writeln!(self.output, "{}", QUIZ_HELP)?;
                    return Ok(QuizFlow::Continue);
                };
                if let Err(e) = self.session.select_answer(number.wrapping_sub(1)) {
                    writeln!(self.output, "{}", e)?;
                    return Ok(QuizFlow::Continue);
                }
                self.advance()
            }
        }
    }

    fn advance(&mut self) -> Result<QuizFlow> {
        if !self.session.is_last() {
            self.session.next()?;
            self.render_question()?;
            return Ok(QuizFlow::Continue);
        }

        match self.session.submit() {
            Ok(score) => Ok(QuizFlow::Finished(score)),
            Err(e) => {
                writeln!(self.output, "{}", e)?;
                Ok(QuizFlow::Continue)
            }
        }
    }

    fn render_question(&mut self) -> Result<()> {
        let index = self.session.current_index();
        let total = self.session.len();
        let selected = self.session.selected_for_current();
        let question = self.session.current_question();

        writeln!(self.output)?;
        writeln!(
            self.output,
            "{}",
            cformat!("<bold>Question {} of {}</bold>", index + 1, total)
        )?;
        writeln!(self.output, "{}", question.question)?;
        for (i, option) in question.options.iter().enumerate() {
            let marker = if selected == Some(i) { "*" } else { " " };
            writeln!(self.output, " {}{}. {}", marker, i + 1, option)?;
        }
        Ok(())
    }

    fn render_results(&mut self, score: QuizScore) -> Result<()> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "{}",
            cformat!(
                "<bold>Quiz Results</bold>: {} / {} ({}%) <cyan>{}</cyan>",
                score.correct,
                score.total,
                score.percentage().round(),
                score.grade().label()
            )
        )?;

        for (i, item) in self.session.review().iter().enumerate() {
            let verdict = if item.is_correct {
                cformat!("<green>Correct!</green>")
            } else {
                cformat!("<red>Incorrect</red>")
            };
            let chosen = item
                .selected
                .and_then(|index| item.question.options.get(index))
                .map_or("-", String::as_str);
            writeln!(self.output, "{}. {}", i + 1, item.question.question)?;
            writeln!(self.output, "   Your answer: {}", chosen)?;
            writeln!(self.output, "   {} - {}", verdict, item.question.correct_option())?;
            if let Some(explanation) = &item.question.explanation {
                writeln!(self.output, "   Explanation: {}", explanation)?;
            }
        }
        Ok(())
    }
}
