//! `create_subtask`: ask the dispatcher to insert a follow-up task.

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};

use super::{Tool, ToolCategory, ToolContext, ToolOutput, ToolSpec, optional_str, required_str};
use crate::core::types::{InsertPosition, QueueInsertion, ToolEffect};

pub struct CreateSubtaskTool;

const SPEC: ToolSpec = ToolSpec {
    name: "create_subtask",
    description: "Add a follow-up task to the plan. Arguments: task_description, reason, optional insert_position (after_current | end_of_queue, default after_current).",
    categories: &[ToolCategory::Executor],
    effect: ToolEffect::Queue,
    path_params: &[],
};

impl Tool for CreateSubtaskTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    fn run(&self, input: &Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let task = required_str(input, "task_description")?.trim();
        let reason = required_str(input, "reason")?.trim();
        if task.is_empty() {
            return Ok(ToolOutput::failed("task_description must not be empty"));
        }
        let position = match optional_str(input, "insert_position")? {
            None => InsertPosition::default(),
            Some(raw) => match InsertPosition::parse(raw) {
                Some(position) => position,
                None => bail!(
                    "insert_position must be 'after_current' or 'end_of_queue', got '{raw}'"
                ),
            },
        };

        Ok(ToolOutput::ok(json!({
            "task_description": task,
            "reason": reason,
            "insert_position": position,
        }))
        .with_queue_insertion(QueueInsertion {
            task: task.to_string(),
            position,
        }))
    }
}
