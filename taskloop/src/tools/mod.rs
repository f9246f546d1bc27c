//! Tool contract and the explicit registration table.
//!
//! Tools are plain structs implementing [`Tool`], registered by name at
//! startup. A tool receives arguments whose path-shaped values were already
//! resolved by the sandbox, and reports file content or queue mutations
//! through [`ToolOutput`] so the dispatcher can apply them.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};

use crate::core::types::{QueueInsertion, ToolEffect};
use crate::io::config::ToolLimits;
use crate::io::review::UserInput;

pub mod bash;
pub mod create_subtask;
pub mod ls;
pub mod read;
pub mod request_user_input;
pub mod write;

/// Names models emit that never correspond to a real tool.
pub const HALLUCINATED_TOOL_NAMES: [&str; 2] =
    ["multi_tool_use.parallel", "functions.AgentReactOutput"];

/// Argument names treated as paths for every tool.
pub const COMMON_PATH_PARAMS: [&str; 10] = [
    "path",
    "file_path",
    "directory",
    "dir_path",
    "source_path",
    "target_path",
    "dest_path",
    "destination",
    "filename",
    "file",
];

/// Loop stages a tool is offered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Planner,
    Executor,
    Replanner,
}

/// Static metadata for a registered tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub categories: &'static [ToolCategory],
    pub effect: ToolEffect,
    /// Extra argument names to resolve through the sandbox.
    pub path_params: &'static [&'static str],
}

impl ToolSpec {
    pub fn is_path_param(&self, key: &str) -> bool {
        COMMON_PATH_PARAMS.contains(&key) || self.path_params.contains(&key)
    }

    pub fn offered_to(&self, category: ToolCategory) -> bool {
        self.categories.contains(&category)
    }
}

/// File content produced by a tool; the dispatcher mints a token for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub payload: Value,
    pub file_content: Option<FileContent>,
    pub queue_insertion: Option<QueueInsertion>,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            file_content: None,
            queue_insertion: None,
        }
    }

    /// An expected failure the model should read and correct.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::String(message.into()),
            file_content: None,
            queue_insertion: None,
        }
    }

    pub fn with_file_content(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.file_content = Some(FileContent {
            path: path.into(),
            content: content.into(),
        });
        self
    }

    pub fn with_queue_insertion(mut self, insertion: QueueInsertion) -> Self {
        self.queue_insertion = Some(insertion);
        self
    }
}

/// Everything a tool may use besides its arguments.
pub struct ToolContext<'a> {
    /// Canonical project root.
    pub root: &'a Path,
    pub limits: ToolLimits,
    /// Injected input function; `None` makes interactive tools unwind.
    pub input: Option<&'a dyn UserInput>,
}

pub trait Tool {
    fn spec(&self) -> &ToolSpec;

    fn run(&self, input: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput>;
}

/// Name-to-implementation table built at startup.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in tool.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let builtins: [Box<dyn Tool>; 6] = [
            Box::new(read::ReadTool),
            Box::new(write::WriteTool),
            Box::new(ls::LsTool),
            Box::new(bash::BashTool),
            Box::new(create_subtask::CreateSubtaskTool),
            Box::new(request_user_input::RequestUserInputTool),
        ];
        for tool in builtins {
            let name = tool.spec().name;
            registry.tools.insert(name, tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<()> {
        let name = tool.spec().name;
        if self.tools.contains_key(name) {
            bail!("tool '{name}' is already registered");
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Specs of tools offered to `category`, sorted by name.
    pub fn specs_for(&self, category: ToolCategory) -> Vec<&ToolSpec> {
        self.tools
            .values()
            .map(|tool| tool.spec())
            .filter(|spec| spec.offered_to(category))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn required_str<'a>(input: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    match input.get(key) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => Err(anyhow!("argument '{key}' must be a string, got {other}")),
        None => Err(anyhow!("missing required argument '{key}'")),
    }
}

pub(crate) fn optional_str<'a>(input: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(other) => Err(anyhow!("argument '{key}' must be a string, got {other}")),
    }
}

pub(crate) fn optional_u64(input: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow!("argument '{key}' must be a non-negative integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("argument '{key}' must be a non-negative integer")),
        Some(other) => Err(anyhow!("argument '{key}' must be an integer, got {other}")),
    }
}

pub(crate) fn optional_bool(input: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(other) => Err(anyhow!("argument '{key}' must be a boolean, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopTool;

    const NOOP_SPEC: ToolSpec = ToolSpec {
        name: "read",
        description: "duplicate name",
        categories: &[ToolCategory::Executor],
        effect: ToolEffect::ReadOnly,
        path_params: &[],
    };

    impl Tool for NoopTool {
        fn spec(&self) -> &ToolSpec {
            &NOOP_SPEC
        }

        fn run(&self, _input: &Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<ToolOutput> {
            Ok(ToolOutput::ok(Value::Null))
        }
    }

    #[test]
    fn builtin_registry_lists_every_tool() {
        let registry = ToolRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "bash",
                "create_subtask",
                "ls",
                "read",
                "request_user_input",
                "write"
            ]
        );
        for name in HALLUCINATED_TOOL_NAMES {
            assert!(registry.get(name).is_none());
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::builtin();
        let err = registry.register(Box::new(NoopTool)).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn planner_sees_only_read_only_tools() {
        let registry = ToolRegistry::builtin();
        let names: Vec<&str> = registry
            .specs_for(ToolCategory::Planner)
            .iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(names, vec!["ls", "read"]);
    }

    #[test]
    fn path_params_include_common_names() {
        assert!(NOOP_SPEC.is_path_param("file_path"));
        assert!(NOOP_SPEC.is_path_param("destination"));
        assert!(!NOOP_SPEC.is_path_param("content"));
    }

    #[test]
    fn argument_helpers_coerce_loose_model_values() {
        let input = json!({"n": "12", "flag": "true", "s": "x", "bad": [1]})
            .as_object()
            .cloned()
            .expect("object");
        assert_eq!(optional_u64(&input, "n").expect("n"), Some(12));
        assert_eq!(optional_bool(&input, "flag").expect("flag"), Some(true));
        assert_eq!(required_str(&input, "s").expect("s"), "x");
        assert!(required_str(&input, "missing").is_err());
        assert!(optional_str(&input, "bad").is_err());
    }
}
