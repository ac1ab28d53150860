//! Entity mention index (L4)
//!
//! Maps normalized entity names to the documents that mention them. Fed by
//! the extractor via `add_mention`; read by the retriever's entity arm.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::normalize_name;
use crate::storage::{atomic_write_json, load_json_or_quarantine};

/// An entity with back-references to the turns that mention it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedEntity {
    /// Display name as first seen
    pub name: String,
    /// Doc ids that mention this entity
    pub turn_references: BTreeSet<String>,
}

/// Normalized entity name -> mention set
pub struct EntityIndex {
    path: PathBuf,
    entities: HashMap<String, IndexedEntity>,
}

impl EntityIndex {
    pub fn open(path: PathBuf) -> Result<Self> {
        let entities = load_json_or_quarantine(&path)?.unwrap_or_default();
        Ok(Self { path, entities })
    }

    pub fn add_mention(&mut self, entity: &str, doc_id: &str) {
        let key = normalize_name(entity);
        if key.is_empty() {
            return;
        }
        self.entities
            .entry(key)
            .or_insert_with(|| IndexedEntity {
                name: entity.trim().to_string(),
                turn_references: BTreeSet::new(),
            })
            .turn_references
            .insert(doc_id.to_string());
    }

    /// Entities matching the given name (exact normalized match)
    pub fn get_related_turns(&self, entity: &str) -> Vec<&IndexedEntity> {
        self.entities
            .get(&normalize_name(entity))
            .into_iter()
            .collect()
    }

    pub fn remove_doc(&mut self, doc_id: &str) {
        self.entities.retain(|_, indexed| {
            indexed.turn_references.remove(doc_id);
            !indexed.turn_references.is_empty()
        });
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Every doc id referenced by any entity
    pub fn doc_ids(&self) -> BTreeSet<String> {
        self.entities
            .values()
            .flat_map(|e| e.turn_references.iter().cloned())
            .collect()
    }

    pub fn flush(&self) -> Result<()> {
        atomic_write_json(&self.path, &self.entities)
    }
}

// ============================================================================
// TESTS
// ============================================================================
