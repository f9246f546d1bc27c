//! `request_user_input`: ask the user a question.
//!
//! With an injected input function the answer comes back immediately.
//! Without one the tool raises [`UserInputRequired`] so the inner loop can
//! unwind and the question is asked on the session's main thread.

use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};

use super::{Tool, ToolCategory, ToolContext, ToolOutput, ToolSpec, required_str};
use crate::core::errors::UserInputRequired;
use crate::core::types::ToolEffect;

pub struct RequestUserInputTool;

const SPEC: ToolSpec = ToolSpec {
    name: "request_user_input",
    description: "Ask the user a question when the task cannot proceed without their decision. Arguments: question_to_ask_user, optional suggested_responses (list of strings).",
    categories: &[ToolCategory::Executor],
    effect: ToolEffect::Interactive,
    path_params: &[],
};

impl Tool for RequestUserInputTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    fn run(&self, input: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let question = required_str(input, "question_to_ask_user")?.trim().to_string();
        if question.is_empty() {
            return Ok(ToolOutput::failed("question_to_ask_user must not be empty"));
        }
        let suggestions = suggested_responses(input)?;

        let Some(user) = ctx.input else {
            return Err(UserInputRequired {
                question,
                suggested_responses: suggestions,
            }
            .into());
        };
        let answer = user.ask(&question, &suggestions)?;
        Ok(answer_output(&question, &answer))
    }
}

/// Observation payload for an answered question.
pub fn answer_output(question: &str, answer: &str) -> ToolOutput {
    ToolOutput::ok(json!({
        "question": question,
        "answer": answer,
    }))
}

fn suggested_responses(input: &Map<String, Value>) -> Result<Vec<String>> {
    match input.get("suggested_responses") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(anyhow!("suggested_responses must be strings, got {other}")),
            })
            .collect(),
        Some(other) => Err(anyhow!("suggested_responses must be a list, got {other}")),
    }
}
