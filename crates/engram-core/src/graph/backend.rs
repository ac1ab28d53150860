//! Graph durability backends
//!
//! The in-memory adjacency maps are authoritative at query time; a backend is
//! only the durability layer, so both implementations must produce identical
//! query answers after a reload. Swapping backends is a data migration, not
//! an API change.

use std::path::PathBuf;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::{EngineError, Result};
use crate::memory::{Node, TemporalFact};
use crate::storage::{atomic_write_json, load_json_strict};

/// Durability layer for nodes and facts
pub trait GraphBackend: Send + Sync {
    /// Load the full graph. A corrupt store is a startup refusal, not a
    /// silent reset: nodes.json / edges.json are the source of truth.
    fn load(&self) -> Result<(Vec<Node>, Vec<TemporalFact>)>;

    /// Persist the full graph snapshot atomically.
    fn save(&self, nodes: &[Node], facts: &[TemporalFact]) -> Result<()>;

    /// Human-readable backend name for stats.
    fn name(&self) -> &'static str;
}

// ============================================================================
// JSON FILE BACKEND
// ============================================================================

/// Zero-dependency JSON file backend: `nodes.json` + `edges.json`
pub struct JsonBackend {
    nodes_path: PathBuf,
    edges_path: PathBuf,
}

impl JsonBackend {
    pub fn new(nodes_path: PathBuf, edges_path: PathBuf) -> Self {
        Self {
            nodes_path,
            edges_path,
        }
    }
}

impl GraphBackend for JsonBackend {
    fn load(&self) -> Result<(Vec<Node>, Vec<TemporalFact>)> {
        let nodes: Vec<Node> = load_json_strict(&self.nodes_path)?.unwrap_or_default();
        let facts: Vec<TemporalFact> = load_json_strict(&self.edges_path)?.unwrap_or_default();
        Ok((nodes, facts))
    }

    fn save(&self, nodes: &[Node], facts: &[TemporalFact]) -> Result<()> {
        atomic_write_json(&self.nodes_path, &nodes)?;
        atomic_write_json(&self.edges_path, &facts)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ============================================================================
// REDB BACKEND
// ============================================================================

/// Rows are JSON values keyed by id. redb keeps keys ordered, which is what
/// makes this backend the faster choice once the graph passes ~1e5 nodes.
const NODES: TableDefinition<&str, &str> = TableDefinition::new("nodes");
const EDGES: TableDefinition<&str, &str> = TableDefinition::new("edges");

/// Embedded ordered key-value backend
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Open or create the database file. Tables are created up front so a
    /// fresh file loads as an empty graph instead of erroring.
    pub fn open(path: PathBuf) -> Result<Self> {
        let db = Database::create(&path)
            .map_err(|e| EngineError::Backend(format!("{}: {e}", path.display())))?;
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(NODES)?;
            write_txn.open_table(EDGES)?;
            write_txn.commit()?;
        }
        Ok(Self { db })
    }
}

impl GraphBackend for RedbBackend {
    fn load(&self) -> Result<(Vec<Node>, Vec<TemporalFact>)> {
        let read_txn = self.db.begin_read()?;
        let mut nodes = Vec::new();
        {
            let table = read_txn.open_table(NODES)?;
            for entry in table.iter()? {
                let (_k, v) = entry?;
                nodes.push(serde_json::from_str(v.value())?);
            }
        }
        let mut facts = Vec::new();
        {
            let table = read_txn.open_table(EDGES)?;
            for entry in table.iter()? {
                let (_k, v) = entry?;
                facts.push(serde_json::from_str(v.value())?);
            }
        }
        Ok((nodes, facts))
    }

    fn save(&self, nodes: &[Node], facts: &[TemporalFact]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        // Full-snapshot save: drop and rewrite both tables in one transaction
        write_txn.delete_table(NODES)?;
        write_txn.delete_table(EDGES)?;
        {
            let mut table = write_txn.open_table(NODES)?;
            for node in nodes {
                let value = serde_json::to_string(node)?;
                table.insert(node.id.as_str(), value.as_str())?;
            }
        }
        {
            let mut table = write_txn.open_table(EDGES)?;
            for fact in facts {
                let value = serde_json::to_string(fact)?;
                table.insert(fact.id.as_str(), value.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redb"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NodeType;
    use tempfile::tempdir;

    fn sample_graph() -> (Vec<Node>, Vec<TemporalFact>) {
        let alice = Node::new("Alice", NodeType::Entity);
        let bob = Node::new("Bob", NodeType::Entity);
        let fact = TemporalFact::new(
            alice.id.as_str(),
            "LOVES",
            bob.id.as_str(),
            "Alice loves Bob",
        );
        (vec![alice, bob], vec![fact])
    }

    #[test]
    fn test_json_backend_roundtrip() {
        let dir = tempdir().unwrap();
        let backend = JsonBackend::new(dir.path().join("nodes.json"), dir.path().join("edges.json"));

        let (nodes, facts) = sample_graph();
        backend.save(&nodes, &facts).unwrap();

        let (loaded_nodes, loaded_facts) = backend.load().unwrap();
        assert_eq!(loaded_nodes.len(), 2);
        assert_eq!(loaded_facts.len(), 1);
        assert_eq!(loaded_facts[0].predicate, "LOVES");
    }

    #[test]
    fn test_json_backend_empty_is_fresh() {
        let dir = tempdir().unwrap();
        let backend = JsonBackend::new(dir.path().join("nodes.json"), dir.path().join("edges.json"));
        let (nodes, facts) = backend.load().unwrap();
        assert!(nodes.is_empty());
        assert!(facts.is_empty());
    }

    #[test]
    fn test_json_backend_corrupt_source_refuses() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("nodes.json"), "{broken").unwrap();
        let backend = JsonBackend::new(dir.path().join("nodes.json"), dir.path().join("edges.json"));
        assert!(backend.load().is_err());
    }

    #[test]
    fn test_redb_backend_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.redb");

        let (nodes, facts) = sample_graph();
        {
            let backend = RedbBackend::open(path.clone()).unwrap();
            backend.save(&nodes, &facts).unwrap();
        }

        let backend = RedbBackend::open(path).unwrap();
        let (loaded_nodes, loaded_facts) = backend.load().unwrap();
        assert_eq!(loaded_nodes.len(), 2);
        assert_eq!(loaded_facts.len(), 1);
    }

    #[test]
    fn test_redb_save_replaces_snapshot() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("graph.redb")).unwrap();

        let (nodes, facts) = sample_graph();
        backend.save(&nodes, &facts).unwrap();
        // Second save with fewer rows must not leave stale ones behind
        backend.save(&nodes[..1], &[]).unwrap();

        let (loaded_nodes, loaded_facts) = backend.load().unwrap();
        assert_eq!(loaded_nodes.len(), 1);
        assert!(loaded_facts.is_empty());
    }
}
