//! Content reference store: short tokens standing in for file contents.
//!
//! Tokens look like `ref:{basename}:{hash8}`, derived from the origin file
//! name and the content digest, so unchanged content always maps to the same
//! token. Entries are never removed; a rewritten file simply gets a new token
//! and the store remembers which token is the latest for each path.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const TOKEN_PREFIX: &str = "ref:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContent {
    pub origin_path: String,
    pub content: String,
}

/// Outcome of resolving a token supplied by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<'a> {
    Exact(&'a StoredContent),
    /// The token was unknown but its base name matched exactly one stored path.
    Corrected {
        token: String,
        entry: &'a StoredContent,
    },
}

impl<'a> Lookup<'a> {
    pub fn entry(&self) -> &'a StoredContent {
        match self {
            Lookup::Exact(entry) => entry,
            Lookup::Corrected { entry, .. } => entry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No entry and no base-name match.
    Missing { token: String },
    /// Several distinct paths share the referenced base name.
    Ambiguous {
        token: String,
        candidates: Vec<String>,
    },
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupError::Missing { token } => write!(
                f,
                "Content reference '{token}' not found. Read the file again to obtain a fresh reference."
            ),
            LookupError::Ambiguous { token, candidates } => write!(
                f,
                "Content reference '{token}' is unknown and its file name matches several files: {}. Read the intended file again to obtain a fresh reference.",
                candidates.join(", ")
            ),
        }
    }
}

impl std::error::Error for LookupError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStore {
    entries: BTreeMap<String, StoredContent>,
    /// Most recently minted token per origin path.
    latest: BTreeMap<String, String>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store content and return its token. Idempotent for unchanged content.
    pub fn put(&mut self, origin_path: &str, content: &str) -> String {
        let token = make_token(origin_path, content);
        self.entries
            .entry(token.clone())
            .or_insert_with(|| StoredContent {
                origin_path: origin_path.to_string(),
                content: content.to_string(),
            });
        self.latest.insert(origin_path.to_string(), token.clone());
        token
    }

    pub fn get(&self, token: &str) -> Option<&StoredContent> {
        self.entries.get(token)
    }

    pub fn latest_token(&self, origin_path: &str) -> Option<&str> {
        self.latest.get(origin_path).map(String::as_str)
    }

    /// Look up `token`, falling back to a unique base-name match.
    pub fn resolve(&self, token: &str) -> Result<Lookup<'_>, LookupError> {
        if let Some(entry) = self.entries.get(token) {
            return Ok(Lookup::Exact(entry));
        }
        let missing = || LookupError::Missing {
            token: token.to_string(),
        };
        let wanted = token_basename(token).ok_or_else(missing)?;

        let candidates: Vec<&String> = self
            .latest
            .keys()
            .filter(|path| basename(path) == wanted)
            .collect();
        match candidates.as_slice() {
            [] => Err(missing()),
            [path] => {
                let latest = self.latest_token(path).ok_or_else(missing)?;
                let entry = self.entries.get(latest).ok_or_else(missing)?;
                Ok(Lookup::Corrected {
                    token: latest.to_string(),
                    entry,
                })
            }
            many => Err(LookupError::Ambiguous {
                token: token.to_string(),
                candidates: many.iter().map(|path| (*path).clone()).collect(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths whose `latest` pointer names no stored entry.
    pub fn dangling_latest(&self) -> Vec<String> {
        self.latest
            .iter()
            .filter(|(_, token)| !self.entries.contains_key(*token))
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// True if `raw` has the shape of a content reference token.
pub fn is_token(raw: &str) -> bool {
    token_basename(raw).is_some()
}

fn make_token(origin_path: &str, content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let short = hex::encode(&digest[..4]);
    format!("{TOKEN_PREFIX}{}:{short}", basename(origin_path))
}

fn token_basename(token: &str) -> Option<&str> {
    let rest = token.strip_prefix(TOKEN_PREFIX)?;
    let (name, hash) = rest.rsplit_once(':')?;
    (!name.is_empty() && !hash.is_empty()).then_some(name)
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_yields_same_token() {
        let mut store = ContentStore::new();
        let first = store.put("/p/src/a.txt", "hello");
        let second = store.put("/p/src/a.txt", "hello");
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert!(first.starts_with("ref:a.txt:"));
        assert_eq!(first.len(), "ref:a.txt:".len() + 8);
    }

    #[test]
    fn changed_content_yields_new_token_and_keeps_old_entry() {
        let mut store = ContentStore::new();
        let old = store.put("/p/a.txt", "v1");
        let new = store.put("/p/a.txt", "v2");
        assert_ne!(old, new);
        assert_eq!(store.get(&old).map(|e| e.content.as_str()), Some("v1"));
        assert_eq!(store.get(&new).map(|e| e.content.as_str()), Some("v2"));
        assert_eq!(store.latest_token("/p/a.txt"), Some(new.as_str()));
    }

    #[test]
    fn unknown_token_is_a_clean_miss() {
        let store = ContentStore::new();
        assert!(store.get("ref:nothing.txt:00000000").is_none());
        assert_eq!(
            store.resolve("ref:nothing.txt:00000000"),
            Err(LookupError::Missing {
                token: "ref:nothing.txt:00000000".to_string()
            })
        );
        assert!(store.resolve("garbage").is_err());
    }

    #[test]
    fn stale_token_is_corrected_to_latest_for_unique_basename() {
        let mut store = ContentStore::new();
        store.put("/p/src/main.rs", "v1");
        let latest = store.put("/p/src/main.rs", "v2");

        let lookup = store.resolve("ref:main.rs:deadbeef").expect("corrected");
        match lookup {
            Lookup::Corrected { token, entry } => {
                assert_eq!(token, latest);
                assert_eq!(entry.content, "v2");
            }
            Lookup::Exact(_) => panic!("expected correction"),
        }
    }

    #[test]
    fn shared_basename_is_ambiguous() {
        let mut store = ContentStore::new();
        store.put("/p/a/mod.rs", "one");
        store.put("/p/b/mod.rs", "two");

        let err = store.resolve("ref:mod.rs:deadbeef").unwrap_err();
        let LookupError::Ambiguous { candidates, .. } = &err else {
            panic!("expected ambiguity, got {err:?}");
        };
        assert_eq!(candidates, &vec!["/p/a/mod.rs".to_string(), "/p/b/mod.rs".to_string()]);
        assert!(err.to_string().contains("/p/a/mod.rs"));
    }

    #[test]
    fn token_shape_detection() {
        assert!(is_token("ref:a.txt:1234abcd"));
        assert!(is_token("ref:weird:name.txt:1234abcd"));
        assert!(!is_token("a.txt"));
        assert!(!is_token("ref::1234"));
    }

    #[test]
    fn store_serializes_losslessly() {
        let mut store = ContentStore::new();
        store.put("/p/a.txt", "v1");
        store.put("/p/a.txt", "v2");
        let json = serde_json::to_string(&store).expect("serialize");
        let back: ContentStore = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, store);
        assert!(back.dangling_latest().is_empty());
    }
}
