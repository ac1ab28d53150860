//! Absolute rules - user-declared natural-language constraints
//!
//! Opaque to the engine: the consistency check offers them to an LLM when one
//! is available, and the context assembler injects them verbatim.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::atomic_write_json;

/// One user-declared constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsoluteRule {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl AbsoluteRule {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Durable rule list for one (user, character) scope
pub struct RuleStore {
    path: PathBuf,
    rules: Vec<AbsoluteRule>,
}

impl RuleStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("absolute_rules.json");
        let rules = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self { path, rules })
    }

    /// Replace the full rule list, deduplicating on exact text
    pub fn set_rules(&mut self, texts: Vec<String>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        self.rules = texts
            .into_iter()
            .filter(|t| !t.trim().is_empty() && seen.insert(t.trim().to_lowercase()))
            .map(AbsoluteRule::new)
            .collect();
        atomic_write_json(&self.path, &self.rules)
    }

    pub fn add_rule(&mut self, text: impl Into<String>) -> Result<String> {
        let rule = AbsoluteRule::new(text);
        let id = rule.id.clone();
        self.rules.push(rule);
        atomic_write_json(&self.path, &self.rules)?;
        Ok(id)
    }

    pub fn rules(&self) -> &[AbsoluteRule] {
        &self.rules
    }

    pub fn texts(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.text.clone()).collect()
    }
}
