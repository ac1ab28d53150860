//! Episodes - conversational turns retained verbatim
//!
//! The episode log is the engine's source of truth for raw text: every turn
//! ever ingested stays in an append-only JSONL file, which is what makes the
//! raw-text fallback scan able to guarantee recall.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// EPISODE
// ============================================================================

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversational turn, stored verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Who spoke
    pub role: Role,
    /// Raw turn text, never rewritten
    pub content: String,
    /// Position in the conversation
    pub turn_number: u64,
    /// When the turn happened
    pub timestamp: DateTime<Utc>,
    /// Owning user
    pub user_id: String,
    /// Owning character
    pub character_id: String,
    /// Memory records produced from this episode
    #[serde(default)]
    pub memory_ids: Vec<String>,
    /// Entities extracted from this episode
    #[serde(default)]
    pub entity_ids: Vec<String>,
    /// Relations extracted from this episode
    #[serde(default)]
    pub relation_ids: Vec<String>,
}

impl Episode {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        turn_number: u64,
        user_id: impl Into<String>,
        character_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            turn_number,
            timestamp: Utc::now(),
            user_id: user_id.into(),
            character_id: character_id.into(),
            memory_ids: Vec::new(),
            entity_ids: Vec::new(),
            relation_ids: Vec::new(),
        }
    }
}

// ============================================================================
// EPISODE STORE
// ============================================================================

/// Append-only episode log backed by a JSONL file
///
/// Writes append a single line; link updates rewrite the file. Loading
/// tolerates a trailing partial line (a crash mid-append) by skipping it.
pub struct EpisodeStore {
    path: PathBuf,
    episodes: HashMap<String, Episode>,
    order: Vec<String>,
}

impl EpisodeStore {
    /// Open (or create) the episode log at `dir/episodes.jsonl`
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("episodes.jsonl");
        let mut store = Self {
            path,
            episodes: HashMap::new(),
            order: Vec::new(),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let file = std::fs::File::open(&self.path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Episode>(line) {
                Ok(ep) => {
                    if !self.episodes.contains_key(&ep.id) {
                        self.order.push(ep.id.clone());
                    }
                    self.episodes.insert(ep.id.clone(), ep);
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "skipping unparsable episode line");
                }
            }
        }
        Ok(())
    }

    /// Append one episode to the log
    pub fn save(&mut self, episode: Episode) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(&episode)?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;

        if !self.episodes.contains_key(&episode.id) {
            self.order.push(episode.id.clone());
        }
        self.episodes.insert(episode.id.clone(), episode);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Episode> {
        self.episodes.get(id)
    }

    pub fn count(&self) -> usize {
        self.episodes.len()
    }

    /// All episodes in insertion order
    pub fn all(&self) -> impl Iterator<Item = &Episode> {
        self.order.iter().filter_map(|id| self.episodes.get(id))
    }

    /// Most recent episodes, newest first
    pub fn recent(&self, limit: usize) -> Vec<&Episode> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.episodes.get(id))
            .take(limit)
            .collect()
    }

    pub fn by_memory_id(&self, memory_id: &str) -> Vec<&Episode> {
        self.all()
            .filter(|ep| ep.memory_ids.iter().any(|m| m == memory_id))
            .collect()
    }

    pub fn by_entity_id(&self, entity_id: &str) -> Vec<&Episode> {
        self.all()
            .filter(|ep| ep.entity_ids.iter().any(|e| e == entity_id))
            .collect()
    }

    pub fn by_relation_id(&self, relation_id: &str) -> Vec<&Episode> {
        self.all()
            .filter(|ep| ep.relation_ids.iter().any(|r| r == relation_id))
            .collect()
    }

    /// Highest turn number seen, or 0 for an empty log
    pub fn last_turn_number(&self) -> u64 {
        self.episodes.values().map(|e| e.turn_number).max().unwrap_or(0)
    }

    /// Attach extraction products to an episode, then rewrite the log
    pub fn update_links(
        &mut self,
        episode_id: &str,
        memory_ids: &[String],
        entity_ids: &[String],
        relation_ids: &[String],
    ) -> Result<()> {
        let Some(ep) = self.episodes.get_mut(episode_id) else {
            return Ok(());
        };
        for id in memory_ids {
            if !ep.memory_ids.contains(id) {
                ep.memory_ids.push(id.clone());
            }
        }
        for id in entity_ids {
            if !ep.entity_ids.contains(id) {
                ep.entity_ids.push(id.clone());
            }
        }
        for id in relation_ids {
            if !ep.relation_ids.contains(id) {
                ep.relation_ids.push(id.clone());
            }
        }
        self.rewrite()
    }

    fn rewrite(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            for ep in self.all() {
                let line = serde_json::to_string(ep)?;
                writeln!(file, "{}", line)?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_reload() {
        let dir = tempdir().unwrap();

        {
            let mut store = EpisodeStore::open(dir.path()).unwrap();
            store
                .save(Episode::new(Role::User, "hello", 1, "u1", "c1"))
                .unwrap();
            store
                .save(Episode::new(Role::Assistant, "hi there", 2, "u1", "c1"))
                .unwrap();
            assert_eq!(store.count(), 2);
        }

        let store = EpisodeStore::open(dir.path()).unwrap();
        assert_eq!(store.count(), 2);
        assert_eq!(store.last_turn_number(), 2);
        let recent = store.recent(1);
        assert_eq!(recent[0].content, "hi there");
    }

    #[test]
    fn test_link_updates_survive_rewrite() {
        let dir = tempdir().unwrap();
        let mut store = EpisodeStore::open(dir.path()).unwrap();
        let ep = Episode::new(Role::User, "I live in Berlin", 1, "u1", "c1");
        let ep_id = ep.id.clone();
        store.save(ep).unwrap();

        store
            .update_links(&ep_id, &["mem-1".into()], &["ent-berlin".into()], &[])
            .unwrap();

        let store = EpisodeStore::open(dir.path()).unwrap();
        let reloaded = store.get(&ep_id).unwrap();
        assert_eq!(reloaded.memory_ids, vec!["mem-1".to_string()]);
        assert_eq!(store.by_entity_id("ent-berlin").len(), 1);
        assert!(store.by_memory_id("mem-2").is_empty());
    }

    #[test]
    fn test_partial_trailing_line_is_skipped() {
        let dir = tempdir().unwrap();
        let mut store = EpisodeStore::open(dir.path()).unwrap();
        store
            .save(Episode::new(Role::User, "complete", 1, "u1", "c1"))
            .unwrap();

        // Simulate a crash mid-append
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("episodes.jsonl"))
            .unwrap();
        write!(file, "{{\"id\": \"trunc").unwrap();
        drop(file);

        let store = EpisodeStore::open(dir.path()).unwrap();
        assert_eq!(store.count(), 1);
    }
}
