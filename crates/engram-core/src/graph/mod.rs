//! Tri-temporal graph
//!
//! Sole write-owner of nodes and facts. The in-memory maps (by id, by name,
//! outgoing / incoming adjacency, by predicate, by node type) are
//! authoritative at query time; the pluggable backend is durability only.
//! Episodes are owned by their own append-only log; the graph holds ids.

mod backend;

pub use backend::{GraphBackend, JsonBackend, RedbBackend};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contradiction::{Contradiction, ContradictionManager};
use crate::error::{EngineError, Result};
use crate::index::{DocId, TemporalEntry, TemporalIndex, TimeRange};
use crate::memory::{normalize_name, Node, NodeType, TemporalFact};

// ============================================================================
// TYPES
// ============================================================================

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    #[default]
    Both,
}

impl Direction {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "in" => Direction::In,
            "out" => Direction::Out,
            _ => Direction::Both,
        }
    }
}

/// What a timeline event marks for a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactEventKind {
    Started,
    Ended,
    Superseded,
}

/// Difference between two point-in-time snapshots of a subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub subject: String,
    pub time1: DateTime<Utc>,
    pub time2: DateTime<Utc>,
    pub added: Vec<TemporalFact>,
    pub removed: Vec<TemporalFact>,
    pub unchanged_count: usize,
}

/// Parameters for [`TemporalGraph::add_edge`]
#[derive(Debug, Clone, Default)]
pub struct EdgeSpec {
    /// Subject node, by name or id
    pub subject: String,
    pub predicate: String,
    /// Object node, by name or id
    pub object: String,
    /// Natural-language restatement; defaults to "subject predicate object"
    pub fact: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub source_text: String,
    pub confidence: f32,
    pub source_episodes: Vec<String>,
    pub check_contradiction: bool,
}

/// Graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub active_node_count: usize,
    pub edge_count: usize,
    pub live_edge_count: usize,
    pub backend: String,
}

// ============================================================================
// GRAPH
// ============================================================================

/// The tri-temporal fact graph for one (user, character) scope
pub struct TemporalGraph {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, TemporalFact>,
    /// normalized name / alias -> node id
    name_to_id: HashMap<String, String>,
    /// node id -> outgoing edge ids
    outgoing: HashMap<String, BTreeSet<String>>,
    /// node id -> incoming edge ids
    incoming: HashMap<String, BTreeSet<String>>,
    by_predicate: HashMap<String, BTreeSet<String>>,
    by_node_type: HashMap<NodeType, BTreeSet<String>>,
    temporal_index: TemporalIndex,
    backend: Box<dyn GraphBackend>,
    /// Predicates for which subject == object is allowed
    self_loop_allowlist: BTreeSet<String>,
}

impl TemporalGraph {
    /// Load the graph from its backend and rebuild every in-memory index.
    ///
    /// Edge entries in the temporal index are derived data and are re-synced
    /// from the loaded facts; entries for other namespaces are left alone.
    pub fn open(backend: Box<dyn GraphBackend>, temporal_index: TemporalIndex) -> Result<Self> {
        let (nodes, facts) = backend.load()?;
        let mut graph = Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            name_to_id: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            by_predicate: HashMap::new(),
            by_node_type: HashMap::new(),
            temporal_index,
            backend,
            self_loop_allowlist: ["ALIAS_OF", "REFERS_TO"]
                .into_iter()
                .map(String::from)
                .collect(),
        };
        for node in nodes {
            graph.index_node(&node);
            graph.nodes.insert(node.id.clone(), node);
        }
        for fact in facts {
            graph.index_edge(&fact);
            graph.edges.insert(fact.id.clone(), fact);
        }
        Ok(graph)
    }

    pub fn set_self_loop_allowlist(&mut self, predicates: impl IntoIterator<Item = String>) {
        self.self_loop_allowlist = predicates.into_iter().collect();
    }

    // ------------------------------------------------------------------
    // Index maintenance
    // ------------------------------------------------------------------

    fn index_node(&mut self, node: &Node) {
        if !node.is_active() {
            return;
        }
        self.name_to_id
            .insert(node.normalized_name(), node.id.clone());
        for alias in &node.aliases {
            self.name_to_id
                .insert(normalize_name(alias), node.id.clone());
        }
        self.by_node_type
            .entry(node.node_type)
            .or_default()
            .insert(node.id.clone());
    }

    fn unindex_node(&mut self, node: &Node) {
        let key = node.normalized_name();
        if self.name_to_id.get(&key) == Some(&node.id) {
            self.name_to_id.remove(&key);
        }
        for alias in &node.aliases {
            let key = normalize_name(alias);
            if self.name_to_id.get(&key) == Some(&node.id) {
                self.name_to_id.remove(&key);
            }
        }
        if let Some(set) = self.by_node_type.get_mut(&node.node_type) {
            set.remove(&node.id);
        }
    }

    fn index_edge(&mut self, fact: &TemporalFact) {
        if fact.expired_at.is_some() {
            return;
        }
        self.outgoing
            .entry(fact.subject.clone())
            .or_default()
            .insert(fact.id.clone());
        self.incoming
            .entry(fact.object.clone())
            .or_default()
            .insert(fact.id.clone());
        self.by_predicate
            .entry(fact.predicate.clone())
            .or_default()
            .insert(fact.id.clone());
        self.temporal_index.add(Self::temporal_entry(fact));
    }

    fn unindex_edge(&mut self, fact: &TemporalFact) {
        if let Some(set) = self.outgoing.get_mut(&fact.subject) {
            set.remove(&fact.id);
        }
        if let Some(set) = self.incoming.get_mut(&fact.object) {
            set.remove(&fact.id);
        }
        if let Some(set) = self.by_predicate.get_mut(&fact.predicate) {
            set.remove(&fact.id);
        }
        self.temporal_index.remove(&DocId::edge(&fact.id));
    }

    fn temporal_entry(fact: &TemporalFact) -> TemporalEntry {
        TemporalEntry {
            doc_id: DocId::edge(&fact.id),
            fact_range: TimeRange::new(fact.valid_from, fact.valid_until),
            known_at: Some(fact.known_at),
            system_range: TimeRange::new(Some(fact.created_at), fact.expired_at),
            subject: fact.subject.clone(),
            predicate: fact.predicate.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Node CRUD
    // ------------------------------------------------------------------

    /// Upsert a node by normalized name.
    ///
    /// An existing active node absorbs the new content / summary /
    /// attributes / aliases, bumps `verification_count`, and is returned;
    /// otherwise a fresh node is created.
    pub fn add_node(
        &mut self,
        name: &str,
        node_type: NodeType,
        content: &str,
        summary: &str,
        attributes: HashMap<String, serde_json::Value>,
        aliases: Vec<String>,
    ) -> Node {
        if let Some(existing_id) = self.name_to_id.get(&normalize_name(name)).cloned() {
            let new_aliases: Vec<String> = {
                let node = self.nodes.get_mut(&existing_id).expect("name map points at live node");
                if !content.is_empty() {
                    node.content = content.to_string();
                }
                if !summary.is_empty() {
                    node.summary = summary.to_string();
                }
                node.attributes.extend(attributes);
                let mut added = Vec::new();
                for alias in aliases {
                    if !node.aliases.iter().any(|a| normalize_name(a) == normalize_name(&alias)) {
                        added.push(alias.clone());
                        node.aliases.push(alias);
                    }
                }
                node.verification_count += 1;
                node.updated_at = Utc::now();
                added
            };
            for alias in new_aliases {
                self.name_to_id.insert(normalize_name(&alias), existing_id.clone());
            }
            return self.nodes[&existing_id].clone();
        }

        let mut node = Node::new(name, node_type);
        node.content = content.to_string();
        node.summary = summary.to_string();
        node.attributes = attributes;
        node.aliases = aliases;
        self.index_node(&node);
        self.nodes.insert(node.id.clone(), node.clone());
        node
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Case-insensitive lookup by name or alias (active nodes only)
    pub fn get_node_by_name(&self, name: &str) -> Option<&Node> {
        self.name_to_id
            .get(&normalize_name(name))
            .and_then(|id| self.nodes.get(id))
    }

    fn resolve_node_id(&self, name_or_id: &str) -> Option<String> {
        if self.nodes.contains_key(name_or_id) {
            return Some(name_or_id.to_string());
        }
        self.name_to_id.get(&normalize_name(name_or_id)).cloned()
    }

    pub fn get_nodes_by_type(&self, node_type: NodeType) -> Vec<&Node> {
        self.by_node_type
            .get(&node_type)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Soft-delete: mark the node expired, cascade to incident facts, and
    /// remove everything from the lookup indexes.
    pub fn remove_node(&mut self, id: &str) -> Result<()> {
        let Some(node_id) = self.resolve_node_id(id) else {
            return Err(EngineError::NotFound(format!("node {id}")));
        };

        let incident: Vec<String> = self
            .outgoing
            .get(&node_id)
            .into_iter()
            .chain(self.incoming.get(&node_id))
            .flatten()
            .cloned()
            .collect();
        for edge_id in incident {
            self.expire_edge(&edge_id)?;
        }

        let node = self.nodes.get_mut(&node_id).expect("resolved id exists");
        node.expire();
        let node = node.clone();
        self.unindex_node(&node);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edge CRUD
    // ------------------------------------------------------------------

    /// Create a fact edge, upserting endpoint nodes supplied as names.
    ///
    /// Self-loops are rejected unless the predicate is allowlisted. When
    /// `check_contradiction` is set and a manager is supplied, rule-tier
    /// detection runs against the subject's live facts and the hits are
    /// returned alongside the new fact (resolution is the caller's call).
    pub fn add_edge(
        &mut self,
        spec: EdgeSpec,
        manager: Option<&ContradictionManager>,
    ) -> Result<(TemporalFact, Vec<Contradiction>)> {
        let subject_node = match self.resolve_node_id(&spec.subject) {
            Some(id) => self.nodes[&id].clone(),
            None => self.add_node(&spec.subject, NodeType::Entity, "", "", HashMap::new(), vec![]),
        };
        let object_node = match self.resolve_node_id(&spec.object) {
            Some(id) => self.nodes[&id].clone(),
            None => self.add_node(&spec.object, NodeType::Entity, "", "", HashMap::new(), vec![]),
        };

        if subject_node.id == object_node.id
            && !self.self_loop_allowlist.contains(&spec.predicate)
        {
            return Err(EngineError::Conflict(format!(
                "self-loop rejected for predicate {}",
                spec.predicate
            )));
        }
        if !subject_node.is_active() || !object_node.is_active() {
            return Err(EngineError::Conflict(
                "edge endpoints must be active nodes".into(),
            ));
        }

        let fact_text = if spec.fact.is_empty() {
            format!("{} {} {}", spec.subject, spec.predicate, spec.object)
        } else {
            spec.fact.clone()
        };

        let mut fact = TemporalFact::new(
            subject_node.id.as_str(),
            spec.predicate.as_str(),
            object_node.id.as_str(),
            fact_text,
        );
        fact.valid_from = spec.valid_from;
        fact.valid_until = spec.valid_until;
        fact.source_text = spec.source_text;
        fact.confidence = spec.confidence.clamp(0.0, 1.0);
        fact.source_episodes = spec.source_episodes;

        let contradictions = if spec.check_contradiction {
            match manager {
                Some(manager) => {
                    let existing = self.live_facts_for_subject(&subject_node.id);
                    manager.detect(&fact, &existing, None, None, None)
                }
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        self.index_edge(&fact);
        self.edges.insert(fact.id.clone(), fact.clone());

        // Endpoint nodes remember the supporting episodes
        for episode_id in &fact.source_episodes {
            for node_id in [&subject_node.id, &object_node.id] {
                let node = self.nodes.get_mut(node_id).expect("endpoint exists");
                if !node.source_episodes.contains(episode_id) {
                    node.source_episodes.push(episode_id.clone());
                }
            }
        }

        Ok((fact, contradictions))
    }

    pub fn get_edge(&self, id: &str) -> Option<&TemporalFact> {
        self.edges.get(id)
    }

    fn live_facts_for_subject(&self, subject_id: &str) -> Vec<TemporalFact> {
        self.outgoing
            .get(subject_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.edges.get(id))
                    .filter(|f| f.is_live())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live facts for a subject, optionally narrowed by predicate and
    /// fact-time point
    pub fn get_edges_by_subject(
        &self,
        subject: &str,
        predicate: Option<&str>,
        valid_at: Option<DateTime<Utc>>,
    ) -> Vec<TemporalFact> {
        let Some(subject_id) = self.resolve_node_id(subject) else {
            return Vec::new();
        };
        let Some(edge_ids) = self.outgoing.get(&subject_id) else {
            return Vec::new();
        };
        edge_ids
            .iter()
            .filter_map(|id| self.edges.get(id))
            .filter(|fact| fact.is_live())
            .filter(|fact| predicate.is_none_or(|p| fact.predicate == p))
            .filter(|fact| valid_at.is_none_or(|at| fact.is_valid_at(at)))
            .cloned()
            .collect()
    }

    /// Close a record on the system-time axis and drop it from the query
    /// indexes. History stays in the edges map.
    pub fn expire_edge(&mut self, id: &str) -> Result<()> {
        let Some(fact) = self.edges.get(id) else {
            return Err(EngineError::NotFound(format!("fact {id}")));
        };
        if fact.expired_at.is_some() {
            return Ok(());
        }
        let snapshot = fact.clone();
        self.unindex_edge(&snapshot);
        self.edges.get_mut(id).expect("checked above").expire();
        Ok(())
    }

    /// Close a fact's validity because a newer fact contradicts it.
    ///
    /// Idempotent: returns `Ok(false)` when the fact is already superseded.
    /// `superseded_at` is pinned to the superseding fact's knowledge time,
    /// clamped to never precede this record's creation.
    pub fn supersede_edge(
        &mut self,
        id: &str,
        valid_until: DateTime<Utc>,
        superseding_known_at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(fact) = self.edges.get_mut(id) else {
            return Err(EngineError::NotFound(format!("fact {id}")));
        };
        if fact.superseded_at.is_some() {
            return Ok(false);
        }
        fact.valid_until = Some(valid_until);
        fact.superseded_at = Some(superseding_known_at.max(fact.created_at));
        let snapshot = fact.clone();
        self.temporal_index.add(Self::temporal_entry(&snapshot));
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Temporal queries
    // ------------------------------------------------------------------

    /// Facts for a subject whose validity interval contains `as_of`
    pub fn query_at_time(
        &self,
        subject: &str,
        as_of: DateTime<Utc>,
        predicate: Option<&str>,
    ) -> Vec<TemporalFact> {
        self.get_edges_by_subject(subject, predicate, Some(as_of))
    }

    /// Chronological fact events (started / ended / superseded) for a subject
    pub fn query_timeline(
        &self,
        subject: &str,
        predicate: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<(DateTime<Utc>, TemporalFact, FactEventKind)> {
        let edges = self.get_edges_by_subject(subject, predicate, None);
        let mut timeline = Vec::new();
        for fact in edges {
            if let Some(t) = fact.valid_from {
                timeline.push((t, fact.clone(), FactEventKind::Started));
            }
            if let Some(t) = fact.valid_until {
                timeline.push((t, fact.clone(), FactEventKind::Ended));
            }
            if let Some(t) = fact.superseded_at {
                timeline.push((t, fact.clone(), FactEventKind::Superseded));
            }
        }
        timeline.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        timeline.retain(|(t, _, _)| start.is_none_or(|s| *t >= s) && end.is_none_or(|e| *t <= e));
        timeline
    }

    /// Set difference between the subject's facts at two points in time
    pub fn compare_snapshots(
        &self,
        subject: &str,
        time1: DateTime<Utc>,
        time2: DateTime<Utc>,
    ) -> SnapshotDiff {
        let facts1 = self.query_at_time(subject, time1, None);
        let facts2 = self.query_at_time(subject, time2, None);

        let keys1: BTreeMap<(String, String), &TemporalFact> = facts1
            .iter()
            .map(|f| ((f.predicate.clone(), f.object.clone()), f))
            .collect();
        let keys2: BTreeMap<(String, String), &TemporalFact> = facts2
            .iter()
            .map(|f| ((f.predicate.clone(), f.object.clone()), f))
            .collect();

        let added = keys2
            .iter()
            .filter(|(k, _)| !keys1.contains_key(*k))
            .map(|(_, f)| (*f).clone())
            .collect();
        let removed = keys1
            .iter()
            .filter(|(k, _)| !keys2.contains_key(*k))
            .map(|(_, f)| (*f).clone())
            .collect();
        let unchanged_count = keys1.keys().filter(|k| keys2.contains_key(*k)).count();

        SnapshotDiff {
            subject: subject.to_string(),
            time1,
            time2,
            added,
            removed,
            unchanged_count,
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    fn edges_from(&self, node_id: &str, direction: Direction) -> BTreeSet<String> {
        let mut edge_ids = BTreeSet::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            if let Some(ids) = self.outgoing.get(node_id) {
                edge_ids.extend(ids.iter().cloned());
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            if let Some(ids) = self.incoming.get(node_id) {
                edge_ids.extend(ids.iter().cloned());
            }
        }
        edge_ids
    }

    fn edge_passes(
        fact: &TemporalFact,
        predicate_filter: Option<&[String]>,
        time_filter: Option<DateTime<Utc>>,
    ) -> bool {
        if !fact.is_live() {
            return false;
        }
        if let Some(predicates) = predicate_filter {
            if !predicates.iter().any(|p| *p == fact.predicate) {
                return false;
            }
        }
        if let Some(at) = time_filter {
            if !fact.is_valid_at(at) {
                return false;
            }
        }
        true
    }

    /// Depth-bucketed breadth-first expansion.
    ///
    /// `max_depth = 0` visits only the start node and returns no edges.
    pub fn bfs(
        &self,
        start: &str,
        max_depth: u32,
        predicate_filter: Option<&[String]>,
        time_filter: Option<DateTime<Utc>>,
        direction: Direction,
    ) -> BTreeMap<u32, Vec<(String, TemporalFact)>> {
        let Some(start_id) = self.resolve_node_id(start) else {
            return BTreeMap::new();
        };

        let mut visited: BTreeSet<String> = [start_id.clone()].into();
        let mut queue: std::collections::VecDeque<(String, u32)> =
            [(start_id, 0u32)].into_iter().collect();
        let mut results: BTreeMap<u32, Vec<(String, TemporalFact)>> = BTreeMap::new();

        while let Some((node_id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge_id in self.edges_from(&node_id, direction) {
                let Some(fact) = self.edges.get(&edge_id) else {
                    continue;
                };
                if !Self::edge_passes(fact, predicate_filter, time_filter) {
                    continue;
                }
                let target = if fact.subject == node_id {
                    fact.object.clone()
                } else {
                    fact.subject.clone()
                };
                results
                    .entry(depth)
                    .or_default()
                    .push((target.clone(), fact.clone()));
                if visited.insert(target.clone()) {
                    queue.push_back((target, depth + 1));
                }
            }
        }
        results
    }

    /// Depth-first expansion in visit order
    pub fn dfs(
        &self,
        start: &str,
        max_depth: u32,
        predicate_filter: Option<&[String]>,
        time_filter: Option<DateTime<Utc>>,
        direction: Direction,
    ) -> Vec<(String, TemporalFact, u32)> {
        let Some(start_id) = self.resolve_node_id(start) else {
            return Vec::new();
        };
        let mut visited: BTreeSet<String> = [start_id.clone()].into();
        let mut results = Vec::new();
        let mut stack = vec![(start_id, 0u32)];

        while let Some((node_id, depth)) = stack.pop() {
            if depth >= max_depth {
                continue;
            }
            for edge_id in self.edges_from(&node_id, direction).into_iter().rev() {
                let Some(fact) = self.edges.get(&edge_id) else {
                    continue;
                };
                if !Self::edge_passes(fact, predicate_filter, time_filter) {
                    continue;
                }
                let target = if fact.subject == node_id {
                    fact.object.clone()
                } else {
                    fact.subject.clone()
                };
                results.push((target.clone(), fact.clone(), depth));
                if visited.insert(target.clone()) {
                    stack.push((target, depth + 1));
                }
            }
        }
        results
    }

    /// First-level neighbours with the connecting fact
    pub fn get_neighbors(&self, node: &str, direction: Direction) -> Vec<(String, TemporalFact)> {
        self.bfs(node, 1, None, None, direction)
            .remove(&0)
            .unwrap_or_default()
    }

    /// Shortest directed path over valid edges.
    ///
    /// `time_filter = None` uses currently-valid edges; `Some(t)` uses the
    /// fact-time axis at `t`. Same source and target yields an empty path.
    pub fn find_path(
        &self,
        source: &str,
        target: &str,
        max_depth: u32,
        time_filter: Option<DateTime<Utc>>,
    ) -> Option<Vec<(String, TemporalFact)>> {
        let source_id = self.resolve_node_id(source)?;
        let target_id = self.resolve_node_id(target)?;
        if source_id == target_id {
            return Some(Vec::new());
        }

        let at = time_filter.unwrap_or_else(Utc::now);
        let mut visited: BTreeSet<String> = [source_id.clone()].into();
        let mut queue: std::collections::VecDeque<(String, Vec<(String, TemporalFact)>)> =
            [(source_id, Vec::new())].into_iter().collect();

        while let Some((current, path)) = queue.pop_front() {
            if path.len() as u32 >= max_depth {
                continue;
            }
            let Some(edge_ids) = self.outgoing.get(&current) else {
                continue;
            };
            for edge_id in edge_ids {
                let Some(fact) = self.edges.get(edge_id) else {
                    continue;
                };
                if !fact.is_valid_at(at) {
                    continue;
                }
                let neighbor = fact.object.clone();
                let mut next_path = path.clone();
                next_path.push((neighbor.clone(), fact.clone()));
                if neighbor == target_id {
                    return Some(next_path);
                }
                if visited.insert(neighbor.clone()) {
                    queue.push_back((neighbor, next_path));
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Persistence and stats
    // ------------------------------------------------------------------

    pub fn save(&mut self) -> Result<()> {
        let nodes: Vec<Node> = self.nodes.values().cloned().collect();
        let facts: Vec<TemporalFact> = self.edges.values().cloned().collect();
        self.backend.save(&nodes, &facts)?;
        self.temporal_index.flush()
    }

    pub fn clear(&mut self) -> Result<()> {
        let edge_ids: Vec<String> = self.edges.keys().cloned().collect();
        for id in edge_ids {
            self.temporal_index.remove(&DocId::edge(&id));
        }
        self.nodes.clear();
        self.edges.clear();
        self.name_to_id.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.by_predicate.clear();
        self.by_node_type.clear();
        self.save()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes.len(),
            active_node_count: self.nodes.values().filter(|n| n.is_active()).count(),
            edge_count: self.edges.len(),
            live_edge_count: self.edges.values().filter(|f| f.is_live()).count(),
            backend: self.backend.name().to_string(),
        }
    }

    /// The temporal index this graph maintains (episode entries are shared
    /// tenants; the graph only owns the `edge:` namespace)
    pub fn temporal_index(&self) -> &TemporalIndex {
        &self.temporal_index
    }

    pub fn temporal_index_mut(&mut self) -> &mut TemporalIndex {
        &mut self.temporal_index
    }

    pub fn live_edge_ids(&self) -> Vec<String> {
        self.edges
            .values()
            .filter(|f| f.is_live())
            .map(|f| f.id.clone())
            .collect()
    }

    pub fn active_node_ids(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.is_active())
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn live_edges(&self) -> impl Iterator<Item = &TemporalFact> {
        self.edges.values().filter(|f| f.is_live())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contradiction::{DetectionStrategy, ResolutionStrategy};
    use tempfile::tempdir;

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn open_graph(dir: &std::path::Path) -> TemporalGraph {
        let backend = JsonBackend::new(dir.join("nodes.json"), dir.join("edges.json"));
        let temporal = TemporalIndex::open(dir.join("temporal.json")).unwrap();
        TemporalGraph::open(Box::new(backend), temporal).unwrap()
    }

    fn edge(subject: &str, predicate: &str, object: &str) -> EdgeSpec {
        EdgeSpec {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: 0.8,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_node_upserts_on_name() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        let first = graph.add_node("Alice", NodeType::Entity, "", "", HashMap::new(), vec![]);
        let second = graph.add_node("alice", NodeType::Entity, "", "", HashMap::new(), vec!["Al".into()]);

        assert_eq!(first.id, second.id);
        assert_eq!(second.verification_count, 2);
        assert_eq!(graph.get_node_by_name("AL").unwrap().id, first.id);
    }

    #[test]
    fn test_add_edge_upserts_endpoints() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        let (fact, _) = graph.add_edge(edge("Alice", "LOVES", "Bob"), None).unwrap();
        assert!(graph.get_node_by_name("Alice").is_some());
        assert!(graph.get_node_by_name("Bob").is_some());
        assert_eq!(fact.fact, "Alice LOVES Bob");
        assert_eq!(graph.get_edges_by_subject("alice", None, None).len(), 1);
    }

    #[test]
    fn test_self_loop_rejected_unless_allowlisted() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());
        graph.add_node("Alice", NodeType::Entity, "", "", HashMap::new(), vec![]);

        let result = graph.add_edge(edge("Alice", "LOVES", "Alice"), None);
        assert!(matches!(result, Err(EngineError::Conflict(_))));

        let result = graph.add_edge(edge("Alice", "ALIAS_OF", "Alice"), None);
        assert!(result.is_ok());
    }

    #[test]
    fn test_query_at_time_selects_by_validity() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        let mut acme = edge("user", "WORKED_AT", "Acme");
        acme.valid_from = Some(dt("2018-01-01T00:00:00Z"));
        acme.valid_until = Some(dt("2020-01-01T00:00:00Z"));
        graph.add_edge(acme, None).unwrap();

        let mut globex = edge("user", "WORKED_AT", "Globex");
        globex.valid_from = Some(dt("2020-01-01T00:00:00Z"));
        globex.valid_until = Some(dt("2023-01-01T00:00:00Z"));
        graph.add_edge(globex, None).unwrap();

        let at_2019 = graph.query_at_time("user", dt("2019-06-01T00:00:00Z"), Some("WORKED_AT"));
        assert_eq!(at_2019.len(), 1);
        let acme_id = graph.get_node_by_name("Acme").unwrap().id.clone();
        assert_eq!(at_2019[0].object, acme_id);

        let at_2021 = graph.query_at_time("user", dt("2021-06-01T00:00:00Z"), Some("WORKED_AT"));
        assert_eq!(at_2021.len(), 1);
        let globex_id = graph.get_node_by_name("Globex").unwrap().id.clone();
        assert_eq!(at_2021[0].object, globex_id);
    }

    #[test]
    fn test_timeline_events_sorted() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        let mut acme = edge("user", "WORKED_AT", "Acme");
        acme.valid_from = Some(dt("2018-01-01T00:00:00Z"));
        acme.valid_until = Some(dt("2020-01-01T00:00:00Z"));
        graph.add_edge(acme, None).unwrap();

        let timeline = graph.query_timeline("user", Some("WORKED_AT"), None, None);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].2, FactEventKind::Started);
        assert_eq!(timeline[1].2, FactEventKind::Ended);

        let windowed = graph.query_timeline(
            "user",
            None,
            Some(dt("2019-01-01T00:00:00Z")),
            None,
        );
        assert_eq!(windowed.len(), 1);
    }

    #[test]
    fn test_compare_snapshots() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        let mut acme = edge("user", "WORKED_AT", "Acme");
        acme.valid_from = Some(dt("2018-01-01T00:00:00Z"));
        acme.valid_until = Some(dt("2020-01-01T00:00:00Z"));
        graph.add_edge(acme, None).unwrap();

        let mut globex = edge("user", "WORKED_AT", "Globex");
        globex.valid_from = Some(dt("2020-06-01T00:00:00Z"));
        graph.add_edge(globex, None).unwrap();

        let diff = graph.compare_snapshots(
            "user",
            dt("2019-01-01T00:00:00Z"),
            dt("2021-01-01T00:00:00Z"),
        );
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.unchanged_count, 0);
    }

    #[test]
    fn test_bfs_depth_buckets_and_zero_depth() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        graph.add_edge(edge("a", "KNOWS", "b"), None).unwrap();
        graph.add_edge(edge("b", "KNOWS", "c"), None).unwrap();

        let results = graph.bfs("a", 2, None, None, Direction::Out);
        assert_eq!(results[&0].len(), 1);
        assert_eq!(results[&1].len(), 1);

        let empty = graph.bfs("a", 0, None, None, Direction::Out);
        assert!(empty.is_empty());

        let missing = graph.bfs("nobody", 2, None, None, Direction::Both);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_find_path() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        graph.add_edge(edge("a", "KNOWS", "b"), None).unwrap();
        graph.add_edge(edge("b", "KNOWS", "c"), None).unwrap();
        graph.add_edge(edge("c", "KNOWS", "d"), None).unwrap();

        let path = graph.find_path("a", "d", 5, None).unwrap();
        assert_eq!(path.len(), 3);

        assert!(graph.find_path("d", "a", 5, None).is_none());
        assert_eq!(graph.find_path("a", "a", 5, None).unwrap().len(), 0);
    }

    #[test]
    fn test_remove_node_cascades() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        graph.add_edge(edge("Alice", "LOVES", "Bob"), None).unwrap();
        let alice_id = graph.get_node_by_name("Alice").unwrap().id.clone();

        graph.remove_node(&alice_id).unwrap();
        assert!(graph.get_node_by_name("Alice").is_none());
        assert!(graph.get_edges_by_subject("Alice", None, None).is_empty());
        assert_eq!(graph.stats().live_edge_count, 0);
        // History survives on the system axis
        assert_eq!(graph.stats().edge_count, 1);
    }

    #[test]
    fn test_roundtrip_save_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut graph = open_graph(dir.path());
            let mut spec = edge("user", "LIVES_IN", "Berlin");
            spec.valid_from = Some(dt("2020-01-01T00:00:00Z"));
            graph.add_edge(spec, None).unwrap();
            graph.save().unwrap();
        }
        let graph = open_graph(dir.path());
        assert_eq!(graph.stats().live_edge_count, 1);
        let facts = graph.query_at_time("user", dt("2021-01-01T00:00:00Z"), Some("LIVES_IN"));
        assert_eq!(facts.len(), 1);
        // The temporal index was rebuilt with the edge entry
        assert_eq!(
            graph.temporal_index().query_by_subject(&facts[0].subject, None, Some("LIVES_IN")).len(),
            1
        );
    }

    #[test]
    fn test_supersede_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());

        let (old_fact, _) = graph.add_edge(edge("Alice", "LOVES", "Bob"), None).unwrap();
        let boundary = dt("2024-01-01T00:00:00Z");

        assert!(graph.supersede_edge(&old_fact.id, boundary, boundary).unwrap());
        let after_first = graph.get_edge(&old_fact.id).unwrap().clone();

        assert!(!graph.supersede_edge(&old_fact.id, dt("2025-01-01T00:00:00Z"), boundary).unwrap());
        let after_second = graph.get_edge(&old_fact.id).unwrap();
        assert_eq!(after_first.valid_until, after_second.valid_until);
        assert_eq!(after_first.superseded_at, after_second.superseded_at);
        // superseded_at never precedes creation
        assert!(after_second.superseded_at.unwrap() >= after_second.created_at);
    }

    #[test]
    fn test_add_edge_detects_contradictions_via_manager() {
        let dir = tempdir().unwrap();
        let mut graph = open_graph(dir.path());
        let manager = ContradictionManager::open(
            dir.path(),
            DetectionStrategy::Rule,
            false,
            ResolutionStrategy::Manual,
        )
        .unwrap();

        graph.add_edge(edge("Alice", "LOVES", "Bob"), Some(&manager)).unwrap();
        let mut second = edge("Alice", "HATES", "Bob");
        second.check_contradiction = true;
        let (_, contradictions) = graph.add_edge(second, Some(&manager)).unwrap();
        assert_eq!(contradictions.len(), 1);
    }
}
