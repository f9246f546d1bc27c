//! Task-queue mutation rules for tool-requested subtasks.

use std::collections::BTreeMap;

use super::types::{InsertPosition, QueueInsertion};

/// Insert a subtask created while the task at `cursor` was executing.
///
/// `created` counts insertions per originating cursor so that consecutive
/// `after_current` insertions keep their creation order. Returns the index
/// the task landed at, or a message when the per-task cap is reached.
pub fn insert_subtask(
    queue: &mut Vec<String>,
    cursor: usize,
    created: &mut BTreeMap<usize, usize>,
    insertion: &QueueInsertion,
    cap: usize,
) -> Result<usize, String> {
    let already = created.get(&cursor).copied().unwrap_or(0);
    if already >= cap {
        return Err(format!(
            "Subtask limit reached: at most {cap} subtasks may be created per task."
        ));
    }
    let index = match insertion.position {
        InsertPosition::AfterCurrent => (cursor + 1 + already).min(queue.len()),
        InsertPosition::EndOfQueue => queue.len(),
    };
    queue.insert(index, insertion.task.clone());
    created.insert(cursor, already + 1);
    Ok(index)
}
