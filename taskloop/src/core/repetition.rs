//! Repetition detector: a bounded ring of recent tool-call signatures.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::types::ToolEffect;

/// `(tool, canonical input hash)` pair stored in the ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub tool: String,
    pub input_hash: String,
}

impl Signature {
    pub fn new(tool: &str, input: &Map<String, Value>) -> Self {
        let canonical = canonical_json(&Value::Object(input.clone()));
        let digest = Sha256::digest(canonical.as_bytes());
        Self {
            tool: tool.to_string(),
            input_hash: hex::encode(&digest[..8]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionDetector {
    threshold: usize,
    capacity: usize,
    recent: VecDeque<Signature>,
}

impl RepetitionDetector {
    pub fn new(threshold: usize, capacity: usize) -> Self {
        Self {
            threshold,
            capacity,
            recent: VecDeque::with_capacity(capacity),
        }
    }

    /// Record the call and report whether it may proceed.
    ///
    /// A call is blocked when its signature already occurs `threshold` times
    /// in the ring; blocked calls are not recorded. Write tools always pass
    /// and never enter the ring.
    pub fn check(&mut self, tool: &str, input: &Map<String, Value>, effect: ToolEffect) -> bool {
        if effect == ToolEffect::Write {
            return true;
        }
        let signature = Signature::new(tool, input);
        if self.occurrences(&signature) >= self.threshold {
            return false;
        }
        if self.capacity == 0 {
            return true;
        }
        while self.recent.len() >= self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(signature);
        true
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn occurrences(&self, signature: &Signature) -> usize {
        self.recent.iter().filter(|s| *s == signature).count()
    }
}

/// Serialize a JSON value with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object input")
    }

    #[test]
    fn fourth_identical_call_is_blocked() {
        let mut detector = RepetitionDetector::new(3, 5);
        let args = input(json!({"path": "a.txt"}));
        for _ in 0..3 {
            assert!(detector.check("read", &args, ToolEffect::ReadOnly));
        }
        assert!(!detector.check("read", &args, ToolEffect::ReadOnly));
        assert!(!detector.check("read", &args, ToolEffect::ReadOnly));
        assert_eq!(detector.len(), 3);
    }

    #[test]
    fn key_order_does_not_change_signature() {
        let mut detector = RepetitionDetector::new(3, 5);
        let a = input(json!({"path": "a.txt", "start_line": 1, "nested": {"x": 1, "y": 2}}));
        let b = input(json!({"nested": {"y": 2, "x": 1}, "start_line": 1, "path": "a.txt"}));
        assert_eq!(Signature::new("read", &a), Signature::new("read", &b));
        assert!(detector.check("read", &a, ToolEffect::ReadOnly));
        assert!(detector.check("read", &b, ToolEffect::ReadOnly));
        assert!(detector.check("read", &a, ToolEffect::ReadOnly));
        assert!(!detector.check("read", &b, ToolEffect::ReadOnly));
    }

    #[test]
    fn writes_are_never_blocked_or_recorded() {
        let mut detector = RepetitionDetector::new(3, 5);
        let args = input(json!({"path": "a.txt", "content": "X"}));
        for _ in 0..10 {
            assert!(detector.check("write", &args, ToolEffect::Write));
        }
        assert!(detector.is_empty());
    }

    #[test]
    fn eviction_lets_an_old_signature_pass_again() {
        let mut detector = RepetitionDetector::new(2, 3);
        let same = input(json!({"command": "ls"}));
        assert!(detector.check("bash", &same, ToolEffect::Command));
        assert!(detector.check("bash", &same, ToolEffect::Command));
        assert!(!detector.check("bash", &same, ToolEffect::Command));

        for n in 0..3 {
            let other = input(json!({"command": format!("echo {n}")}));
            assert!(detector.check("bash", &other, ToolEffect::Command));
        }
        assert_eq!(detector.len(), 3);
        assert!(detector.check("bash", &same, ToolEffect::Command));
    }

    #[test]
    fn different_tools_with_same_input_are_distinct() {
        let mut detector = RepetitionDetector::new(1, 5);
        let args = input(json!({"path": "src"}));
        assert!(detector.check("ls", &args, ToolEffect::ReadOnly));
        assert!(detector.check("read", &args, ToolEffect::ReadOnly));
        assert!(!detector.check("ls", &args, ToolEffect::ReadOnly));
    }

    #[test]
    fn reset_clears_ring() {
        let mut detector = RepetitionDetector::new(1, 5);
        let args = input(json!({"path": "a.txt"}));
        assert!(detector.check("read", &args, ToolEffect::ReadOnly));
        assert!(!detector.check("read", &args, ToolEffect::ReadOnly));
        detector.reset();
        assert!(detector.is_empty());
        assert!(detector.check("read", &args, ToolEffect::ReadOnly));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": [{"d": 1, "c": 2}], "a": "x"});
        assert_eq!(canonical_json(&value), r#"{"a":"x","b":[{"c":2,"d":1}]}"#);
    }
}
