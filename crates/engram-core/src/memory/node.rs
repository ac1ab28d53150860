//! Graph nodes - entities, episodes, communities
//!
//! A node is anything a fact can point at. Episodes are nodes too; their
//! `content` field holds the raw turn text verbatim.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// NODE TYPES
// ============================================================================

/// Types of graph nodes
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A named entity referenced by facts
    #[default]
    Entity,
    /// A conversational turn retained verbatim
    Episode,
    /// An aggregate over related entities
    Community,
}

impl NodeType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Entity => "entity",
            NodeType::Episode => "episode",
            NodeType::Community => "community",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "episode" => NodeType::Episode,
            "community" => NodeType::Community,
            _ => NodeType::Entity,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// NODE
// ============================================================================

/// A node in the tri-temporal graph
///
/// Name + alias lookup is case-insensitive; the graph's upsert path guarantees
/// that two active nodes never share a normalized name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Display name and primary lookup key
    pub name: String,
    /// Node kind
    pub node_type: NodeType,
    /// Raw content (episodes keep the verbatim turn here)
    #[serde(default)]
    pub content: String,
    /// Short summary, if one has been produced
    #[serde(default)]
    pub summary: String,
    /// Free-form attributes
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Alternate names that resolve to this node
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Per-field embedding vectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_embedding: Option<Vec<f32>>,
    /// When the node was created
    pub created_at: DateTime<Utc>,
    /// When the node was last modified
    pub updated_at: DateTime<Utc>,
    /// Soft-delete timestamp; the node is active iff this is None
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    /// How many times an upsert re-confirmed this node
    #[serde(default)]
    pub verification_count: u32,
    /// Episodes this node was observed in
    #[serde(default)]
    pub source_episodes: Vec<String>,
}

impl Node {
    /// Create a new entity node with the given name
    pub fn new(name: impl Into<String>, node_type: NodeType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            node_type,
            content: String::new(),
            summary: String::new(),
            attributes: HashMap::new(),
            aliases: Vec::new(),
            name_embedding: None,
            summary_embedding: None,
            content_embedding: None,
            created_at: now,
            updated_at: now,
            expired_at: None,
            verification_count: 1,
            source_episodes: Vec::new(),
        }
    }

    /// A node is active until soft-deleted
    pub fn is_active(&self) -> bool {
        self.expired_at.is_none()
    }

    /// Soft-delete the node
    pub fn expire(&mut self) {
        self.expired_at = Some(Utc::now());
    }

    /// Case-insensitive lookup key for the name map
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// The text that best represents this node for embedding / dedup purposes
    pub fn representative_text(&self) -> &str {
        if !self.content.is_empty() {
            &self.content
        } else if !self.summary.is_empty() {
            &self.summary
        } else {
            &self.name
        }
    }
}

/// Shared normalization for the case-insensitive name -> id mapping
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_roundtrip() {
        for node_type in [NodeType::Entity, NodeType::Episode, NodeType::Community] {
            assert_eq!(NodeType::parse_name(node_type.as_str()), node_type);
        }
        assert_eq!(NodeType::parse_name("unknown"), NodeType::Entity);
    }

    #[test]
    fn test_new_node_is_active() {
        let node = Node::new("Alice", NodeType::Entity);
        assert!(node.is_active());
        assert_eq!(node.verification_count, 1);
        assert_eq!(node.normalized_name(), "alice");
    }

    #[test]
    fn test_expire() {
        let mut node = Node::new("Alice", NodeType::Entity);
        node.expire();
        assert!(!node.is_active());
    }

    #[test]
    fn test_representative_text_preference() {
        let mut node = Node::new("Berlin", NodeType::Entity);
        assert_eq!(node.representative_text(), "Berlin");
        node.summary = "Capital of Germany".into();
        assert_eq!(node.representative_text(), "Capital of Germany");
        node.content = "Berlin is the capital of Germany".into();
        assert_eq!(node.representative_text(), "Berlin is the capital of Germany");
    }
}
