//! Human verification of plans and the injectable user-input function.

use std::cell::RefCell;
use std::io::{self, BufRead, BufReader, Stderr, Stdin, Write};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Verdict on a proposed plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanVerdict {
    Approve,
    Feedback(String),
    Cancel,
}

/// Synchronous question/answer channel to the user.
pub trait UserInput {
    /// Ask `question`; `choices` are suggestions the user may pick from.
    fn ask(&self, question: &str, choices: &[String]) -> Result<String>;
}

/// Reviews each plan once before it executes.
pub trait PlanReviewer {
    fn review(&self, plan: &[String]) -> Result<PlanVerdict>;
}

impl<T: PlanReviewer + ?Sized> PlanReviewer for &T {
    fn review(&self, plan: &[String]) -> Result<PlanVerdict> {
        (**self).review(plan)
    }
}

/// Approves every plan; used for unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl PlanReviewer for AutoApprove {
    fn review(&self, _plan: &[String]) -> Result<PlanVerdict> {
        Ok(PlanVerdict::Approve)
    }
}

const FOLLOW_UP_QUESTION: &str = "What would you like to change about the plan?";
const OWN_ANSWER_CHOICE: &str = "Let me enter my own answer";

/// Reviewer that asks through a [`UserInput`].
pub struct InteractiveReviewer<'a> {
    input: &'a dyn UserInput,
}

impl<'a> InteractiveReviewer<'a> {
    pub fn new(input: &'a dyn UserInput) -> Self {
        Self { input }
    }
}

impl PlanReviewer for InteractiveReviewer<'_> {
    fn review(&self, plan: &[String]) -> Result<PlanVerdict> {
        let mut question = String::from("Proposed plan:\n");
        for (i, task) in plan.iter().enumerate() {
            question.push_str(&format!("  {}. {task}\n", i + 1));
        }
        question.push_str("Approve this plan? [Y/n/cancel, or type feedback]");

        let answer = self.input.ask(&question, &[])?;
        match interpret_answer(&answer) {
            Answer::Verdict(verdict) => Ok(verdict),
            Answer::AskWhatToChange => {
                let feedback = self.input.ask(FOLLOW_UP_QUESTION, &[])?;
                let feedback = feedback.trim();
                if feedback.is_empty() {
                    Ok(PlanVerdict::Feedback(
                        "The user rejected the plan. Propose a different approach.".to_string(),
                    ))
                } else {
                    Ok(PlanVerdict::Feedback(feedback.to_string()))
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Answer {
    Verdict(PlanVerdict),
    AskWhatToChange,
}

fn interpret_answer(raw: &str) -> Answer {
    let answer = raw.trim();
    match answer.to_ascii_lowercase().as_str() {
        "" | "y" | "yes" => Answer::Verdict(PlanVerdict::Approve),
        "cancel" => Answer::Verdict(PlanVerdict::Cancel),
        "n" | "no" => Answer::AskWhatToChange,
        _ => Answer::Verdict(PlanVerdict::Feedback(answer.to_string())),
    }
}

/// Line-oriented terminal input. Prompts go to `writer`, answers come from `reader`.
pub struct TerminalInput<R, W> {
    reader: RefCell<R>,
    writer: RefCell<W>,
}

impl TerminalInput<BufReader<Stdin>, Stderr> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalInput<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: RefCell::new(reader),
            writer: RefCell::new(writer),
        }
    }

    fn prompt(&self, text: &str) -> Result<String> {
        {
            let mut writer = self.writer.borrow_mut();
            write!(writer, "{text}").context("write prompt")?;
            writer.flush().context("flush prompt")?;
        }
        let mut line = String::new();
        let read = self
            .reader
            .borrow_mut()
            .read_line(&mut line)
            .context("read answer")?;
        if read == 0 {
            bail!("input closed before an answer was given");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl<R: BufRead, W: Write> UserInput for TerminalInput<R, W> {
    fn ask(&self, question: &str, choices: &[String]) -> Result<String> {
        if choices.is_empty() {
            return self.prompt(&format!("{question}\n> "));
        }

        let mut text = format!("{question}\n");
        for (i, choice) in choices.iter().enumerate() {
            text.push_str(&format!("  {}. {choice}\n", i + 1));
        }
        let own = choices.len() + 1;
        text.push_str(&format!("  {own}. {OWN_ANSWER_CHOICE}\n> "));
        let answer = self.prompt(&text)?;

        match answer.trim().parse::<usize>() {
            Ok(n) if (1..=choices.len()).contains(&n) => {
                debug!(choice = n, "picked suggested answer");
                Ok(choices[n - 1].clone())
            }
            Ok(n) if n == own => self.prompt("Your answer:\n> "),
            _ => Ok(answer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn terminal(answers: &str) -> TerminalInput<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalInput::new(Cursor::new(answers.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn interprets_review_answers() {
        assert_eq!(interpret_answer("Y"), Answer::Verdict(PlanVerdict::Approve));
        assert_eq!(interpret_answer(" yes "), Answer::Verdict(PlanVerdict::Approve));
        assert_eq!(interpret_answer("cancel"), Answer::Verdict(PlanVerdict::Cancel));
        assert_eq!(interpret_answer("no"), Answer::AskWhatToChange);
        assert_eq!(
            interpret_answer("split step 2"),
            Answer::Verdict(PlanVerdict::Feedback("split step 2".to_string()))
        );
    }

    #[test]
    fn rejecting_asks_what_to_change() {
        let input = terminal("n\nuse sqlite instead\n");
        let verdict = InteractiveReviewer::new(&input)
            .review(&["set up db".to_string()])
            .expect("review");
        assert_eq!(verdict, PlanVerdict::Feedback("use sqlite instead".to_string()));

        let shown = String::from_utf8(input.writer.into_inner()).expect("utf8");
        assert!(shown.contains("1. set up db"));
        assert!(shown.contains(FOLLOW_UP_QUESTION));
    }

    #[test]
    fn numbered_choice_selects_suggestion() {
        let input = terminal("2\n");
        let answer = input
            .ask("Which db?", &["postgres".to_string(), "sqlite".to_string()])
            .expect("ask");
        assert_eq!(answer, "sqlite");
    }

    #[test]
    fn own_answer_choice_prompts_again() {
        let input = terminal("3\nmysql\n");
        let answer = input
            .ask("Which db?", &["postgres".to_string(), "sqlite".to_string()])
            .expect("ask");
        assert_eq!(answer, "mysql");
    }

    #[test]
    fn closed_input_is_an_error() {
        let input = terminal("");
        assert!(input.ask("anything?", &[]).is_err());
    }
}
