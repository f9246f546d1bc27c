//! Scripted collaborators and fixtures for loop tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::io::config::{EngineConfig, write_config};
use crate::io::init::TaskloopPaths;
use crate::io::model::{ModelClient, ModelRequest, Stage};
use crate::io::review::{PlanReviewer, PlanVerdict, UserInput};

/// Model client returning queued responses per stage and recording every request.
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    responses: RefCell<BTreeMap<&'static str, VecDeque<Result<Value, String>>>>,
    requests: RefCell<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stage: Stage, response: Value) -> &Self {
        self.queue(stage, Ok(response))
    }

    pub fn push_error(&self, stage: Stage, message: &str) -> &Self {
        self.queue(stage, Err(message.to_string()))
    }

    fn queue(&self, stage: Stage, response: Result<Value, String>) -> &Self {
        self.responses
            .borrow_mut()
            .entry(stage.as_str())
            .or_default()
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.borrow().clone()
    }

    pub fn requests_for(&self, stage: Stage) -> Vec<ModelRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.stage == stage)
            .cloned()
            .collect()
    }

    /// Responses not yet consumed for `stage`.
    pub fn remaining(&self, stage: Stage) -> usize {
        self.responses
            .borrow()
            .get(stage.as_str())
            .map_or(0, VecDeque::len)
    }
}

impl ModelClient for ScriptedModelClient {
    fn complete(&self, request: &ModelRequest) -> Result<Value> {
        self.requests.borrow_mut().push(request.clone());
        let next = self
            .responses
            .borrow_mut()
            .get_mut(request.stage.as_str())
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "no scripted response left for stage {}",
                request.stage.as_str()
            )),
        }
    }
}

/// Reviewer returning queued verdicts; approves once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedReviewer {
    verdicts: RefCell<VecDeque<PlanVerdict>>,
    reviewed: RefCell<Vec<Vec<String>>>,
}

impl ScriptedReviewer {
    pub fn new(verdicts: impl IntoIterator<Item = PlanVerdict>) -> Self {
        Self {
            verdicts: RefCell::new(verdicts.into_iter().collect()),
            reviewed: RefCell::new(Vec::new()),
        }
    }

    pub fn reviewed(&self) -> Vec<Vec<String>> {
        self.reviewed.borrow().clone()
    }
}

impl PlanReviewer for ScriptedReviewer {
    fn review(&self, plan: &[String]) -> Result<PlanVerdict> {
        self.reviewed.borrow_mut().push(plan.to_vec());
        Ok(self
            .verdicts
            .borrow_mut()
            .pop_front()
            .unwrap_or(PlanVerdict::Approve))
    }
}

/// User input returning queued answers and recording the questions.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: RefCell<VecDeque<String>>,
    questions: RefCell<Vec<String>>,
}

impl ScriptedInput {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().map(Into::into).collect()),
            questions: RefCell::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }
}

impl UserInput for ScriptedInput {
    fn ask(&self, question: &str, _choices: &[String]) -> Result<String> {
        self.questions.borrow_mut().push(question.to_string());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted answer for: {question}"))
    }
}

/// Temporary project root with `.taskloop/` paths.
pub struct TestProject {
    _temp: tempfile::TempDir,
    root: PathBuf,
    pub paths: TaskloopPaths,
}

impl TestProject {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical root");
        let paths = TaskloopPaths::new(&root);
        Self {
            _temp: temp,
            root,
            paths,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root.join(rel)).expect("read file")
    }

    pub fn write_config(&self, config: &EngineConfig) {
        write_config(&self.paths.config_path, config).expect("write config");
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

pub fn plan(tasks: &[&str]) -> Value {
    json!({ "subtasks": tasks })
}

pub fn replan_tasks(tasks: &[&str], summary: &str) -> Value {
    json!({ "tasks": tasks, "summary": summary })
}

/// Replanner verdict that the goal is achieved.
pub fn replan_done(summary: &str) -> Value {
    replan_tasks(&[], summary)
}

pub fn action(tool: &str, input: Value) -> Value {
    json!({
        "thought": format!("call {tool}"),
        "action": tool,
        "action_input": input,
        "final_answer": null,
        "replan_reason": null,
    })
}

pub fn final_answer(text: &str) -> Value {
    json!({
        "thought": "done",
        "action": null,
        "action_input": null,
        "final_answer": text,
        "replan_reason": null,
    })
}

pub fn replan_request(reason: &str) -> Value {
    json!({
        "thought": "the plan no longer fits",
        "action": null,
        "action_input": null,
        "final_answer": null,
        "replan_reason": reason,
    })
}
