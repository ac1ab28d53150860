//! Memory engine
//!
//! The public facade over one data root. Each (user, character) pair owns an
//! isolated store (graph + episode log + index family + condition tracker +
//! contradiction log); a per-store mutex serializes writes so a user's next
//! read always observes their previous write. The public `add` never fails on
//! extraction trouble - the raw episode is stored first and every downgrade
//! comes back in `warnings`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigHandle, ConfigWatcher, EmbeddingMode, EngineConfig};
use crate::consistency::check_absolute_rules;
use crate::context::{assemble, dereference, ContextInputs, ContextSources};
use crate::contradiction::{
    Contradiction, ContradictionManager, ContradictionStats, ResolutionResult, ResolutionStrategy,
};
use crate::error::{EngineError, Result};
use crate::extract::{DedupItem, Extractor, MatchKind};
use crate::graph::{
    Direction, EdgeSpec, FactEventKind, GraphBackend, JsonBackend, RedbBackend, SnapshotDiff,
    TemporalGraph,
};
use crate::index::{
    BloomFilter, Bm25Config, DocId, EntityIndex, FullTextIndex, InvertedIndex, IvfConfig,
    IvfVectorIndex, NgramIndex, TemporalEntry, TemporalIndex, TimeRange,
};
use crate::memory::{
    ConditionTracker, Episode, EpisodeStore, NodeType, PersistentCondition, Role, RuleStore,
    TemporalFact,
};
use crate::providers::{
    BudgetManager, CrossEncoderProvider, EmbeddingProvider, EmbeddingService, LlmProvider,
    OpenAiCompatEmbeddings, OpenAiCompatLlm, ProviderSettings, UsageStats,
};
use crate::retrieval::{
    llm_judge_rerank, Retriever, TemporalContext,
};
use crate::storage::{default_data_root, StorePaths};

// ============================================================================
// PUBLIC TYPES
// ============================================================================

/// Response of [`MemoryEngine::add`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddResult {
    /// Episode id of the stored turn
    pub id: String,
    /// Entity names extracted from the turn
    pub entities: Vec<String>,
    /// Contradictions, rule violations, and degradations
    pub consistency_warnings: Vec<String>,
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub metadata: serde_json::Value,
    pub entities: Vec<String>,
}

/// Optional search narrowing
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub character_id: Option<String>,
    pub time_start: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
}

/// Response of [`MemoryEngine::build_context`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltContext {
    pub context: String,
    pub token_estimate: usize,
}

/// Engine-wide statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub store_count: usize,
    pub episode_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub pending_contradictions: usize,
    pub usage: UsageStats,
}

/// Per-store index/graph population counts, used to check that every index
/// enumerates exactly the ids the owning stores know about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDiagnostics {
    pub episode_count: usize,
    pub active_node_count: usize,
    pub live_edge_count: usize,
    pub ngram_doc_count: usize,
    pub inverted_doc_count: usize,
    pub fulltext_doc_count: usize,
    pub temporal_entry_count: usize,
    pub vector_count: usize,
    pub active_condition_count: usize,
}

const DEFAULT_CHARACTER: &str = "default";

// ============================================================================
// USER STORE
// ============================================================================

/// Everything owned by one (user, character) scope
struct UserStore {
    paths: StorePaths,
    graph: TemporalGraph,
    episodes: EpisodeStore,
    inverted: InvertedIndex,
    ngram: NgramIndex,
    entity: EntityIndex,
    fulltext: FullTextIndex,
    vector: IvfVectorIndex,
    bloom: BloomFilter,
    conditions: ConditionTracker,
    rules: RuleStore,
    contradictions: ContradictionManager,
    dedup: crate::extract::Deduplicator,
}

impl UserStore {
    fn open(paths: StorePaths, config: &EngineConfig) -> Result<Self> {
        paths.ensure()?;

        let temporal = TemporalIndex::open(paths.index_file("temporal.json"))?;
        let backend: Box<dyn GraphBackend> = match config.graph.backend.as_str() {
            "redb" | "kv" => Box::new(RedbBackend::open(paths.graph_kv())?),
            _ => Box::new(JsonBackend::new(paths.nodes(), paths.edges())),
        };
        let graph = TemporalGraph::open(backend, temporal)?;

        let episodes = EpisodeStore::open(&paths.root)?;
        let inverted =
            InvertedIndex::open(paths.index_file("inverted.json"), config.index.flush_every)?;
        let ngram = NgramIndex::open(paths.index_file("ngram.json"))?;
        let entity = EntityIndex::open(paths.index_file("entity.json"))?;
        let fulltext =
            FullTextIndex::open(paths.index_file("fulltext.json"), Bm25Config::default())?;
        let vector = IvfVectorIndex::load(
            &paths.vector_bin(),
            IvfConfig {
                nlist: config.index.vector_nlist,
                nprobe: config.index.vector_nprobe,
                train_threshold: config.index.vector_train_threshold,
                hnsw_m: config.index.vector_hnsw_m,
                hnsw_ef_construction: config.index.vector_ef_construction,
                hnsw_ef_search: config.index.vector_ef_search,
            },
        )?;
        let bloom = BloomFilter::load(
            &paths.index_file("bloom.json"),
            config.index.bloom_expected_items,
        )?;
        let conditions = ConditionTracker::open(&paths.root, config.conditions.clone())?;
        let rules = RuleStore::open(&paths.root)?;
        let contradictions = ContradictionManager::open(
            &paths.contradictions_dir(),
            config.contradiction.strategy,
            config.contradiction.auto_resolve,
            config.contradiction.default_resolution,
        )?;

        let mut store = Self {
            paths,
            graph,
            episodes,
            inverted,
            ngram,
            entity,
            fulltext,
            vector,
            bloom,
            conditions,
            rules,
            contradictions,
            dedup: crate::extract::Deduplicator::new(config.extractor.dedup.clone()),
        };

        // Episode entries in the temporal index are rebuilt from the episode
        // log (the graph only re-syncs its own edge entries)
        let entries: Vec<TemporalEntry> = store
            .episodes
            .all()
            .map(|ep| TemporalEntry {
                doc_id: DocId::memory(&ep.id),
                fact_range: TimeRange::new(Some(ep.timestamp), Some(ep.timestamp)),
                known_at: Some(ep.timestamp),
                system_range: TimeRange::new(Some(ep.timestamp), None),
                subject: String::new(),
                predicate: String::new(),
            })
            .collect();
        for entry in entries {
            store.graph.temporal_index_mut().add(entry);
        }

        // Seed the deduplicator with the known entity nodes
        let seed_items: Vec<DedupItem> = store
            .graph
            .get_nodes_by_type(NodeType::Entity)
            .into_iter()
            .map(|node| {
                DedupItem::new(node.id.as_str(), node.name.as_str(), node.representative_text())
            })
            .collect();
        for item in seed_items {
            store.dedup.add_to_index(item);
        }

        Ok(store)
    }

    fn flush(&mut self) -> Result<()> {
        self.graph.save()?;
        self.inverted.flush()?;
        self.ngram.flush()?;
        self.entity.flush()?;
        self.fulltext.flush()?;
        self.vector.save(&self.paths.vector_bin())?;
        self.bloom.flush(&self.paths.index_file("bloom.json"))?;
        Ok(())
    }

    fn index_document(&mut self, doc_id: &str, text: &str, embedding: Option<Vec<f32>>) -> Result<()> {
        self.inverted.add(doc_id, text)?;
        self.ngram.add(doc_id, text);
        self.fulltext.add(doc_id, text);
        for token in crate::index::tokenize(text) {
            self.bloom.insert(&token);
        }
        if let Some(embedding) = embedding {
            self.vector.add(doc_id, embedding)?;
        }
        Ok(())
    }

    fn retriever<'a>(
        &'a self,
        config: &'a EngineConfig,
        embeddings: &'a EmbeddingService,
        cross_encoder: Option<&'a dyn CrossEncoderProvider>,
    ) -> Retriever<'a> {
        Retriever {
            bloom: Some(&self.bloom),
            inverted: Some(&self.inverted),
            entity: Some(&self.entity),
            ngram: Some(&self.ngram),
            fulltext: Some(&self.fulltext),
            vector: Some(&self.vector),
            temporal: Some(self.graph.temporal_index()),
            graph: config.graph.enabled.then_some(&self.graph),
            embeddings,
            cross_encoder,
            config: &config.retrieval,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The embedded memory engine over one data root
pub struct MemoryEngine {
    data_root: PathBuf,
    config: Arc<ConfigHandle>,
    _watcher: ConfigWatcher,
    stores: RwLock<HashMap<(String, String), Arc<Mutex<UserStore>>>>,
    embeddings: Arc<EmbeddingService>,
    llm: Option<Arc<dyn LlmProvider>>,
    cross_encoder: Option<Arc<dyn CrossEncoderProvider>>,
    budget: Arc<BudgetManager>,
}

impl MemoryEngine {
    /// Open the engine with providers built from the configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        let embedding_provider = Self::build_embedding_provider(&config)?;
        let llm = Self::build_llm_provider(&config)?;
        Self::with_providers(config, embedding_provider, llm, None)
    }

    /// Open the engine with caller-supplied providers (tests, local models)
    pub fn with_providers(
        config: EngineConfig,
        embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
        llm: Option<Arc<dyn LlmProvider>>,
        cross_encoder: Option<Arc<dyn CrossEncoderProvider>>,
    ) -> Result<Self> {
        let data_root = match &config.data_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                root.clone()
            }
            None => default_data_root()?,
        };
        let settings_file = data_root.join("core_settings.json");
        let budget = Arc::new(BudgetManager::new(config.budget));
        let handle = Arc::new(ConfigHandle::new(config, Some(settings_file)));
        let watcher = ConfigWatcher::spawn(handle.clone());

        Ok(Self {
            data_root,
            config: handle,
            _watcher: watcher,
            stores: RwLock::new(HashMap::new()),
            embeddings: Arc::new(EmbeddingService::new(embedding_provider)),
            llm,
            cross_encoder,
            budget,
        })
    }

    fn build_embedding_provider(
        config: &EngineConfig,
    ) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
        match config.embedding.mode {
            EmbeddingMode::None => Ok(None),
            EmbeddingMode::Api => {
                let provider = OpenAiCompatEmbeddings::new(
                    ProviderSettings {
                        api_key: config.embedding.api_key.clone(),
                        base_url: config.embedding.api_base.clone(),
                        model: config.embedding.model.clone(),
                        timeout: std::time::Duration::from_secs_f64(config.llm.timeout_secs),
                    },
                    config.embedding.dimension,
                )?;
                Ok(Some(Arc::new(provider)))
            }
            EmbeddingMode::Local => {
                #[cfg(feature = "local-embeddings")]
                {
                    Ok(Some(Arc::new(crate::providers::LocalEmbeddingProvider)))
                }
                #[cfg(not(feature = "local-embeddings"))]
                {
                    tracing::warn!(
                        "RECALL_EMBEDDING_MODE=local requires the local-embeddings feature; \
                         embedding disabled"
                    );
                    Ok(None)
                }
            }
        }
    }

    fn build_llm_provider(config: &EngineConfig) -> Result<Option<Arc<dyn LlmProvider>>> {
        if !config.llm.is_configured() {
            return Ok(None);
        }
        let provider = OpenAiCompatLlm::new(ProviderSettings {
            api_key: config.llm.api_key.clone(),
            base_url: config.llm.api_base.clone(),
            model: config.llm.model.clone(),
            timeout: std::time::Duration::from_secs_f64(config.llm.timeout_secs),
        })?;
        Ok(Some(Arc::new(provider)))
    }

    fn store(&self, user_id: &str, character_id: &str) -> Result<Arc<Mutex<UserStore>>> {
        let key = (user_id.to_string(), character_id.to_string());
        if let Some(store) = self.stores.read().expect("stores lock poisoned").get(&key) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().expect("stores lock poisoned");
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let config = self.config.snapshot();
        let paths = StorePaths::new(&self.data_root, user_id, character_id);
        let store = Arc::new(Mutex::new(UserStore::open(paths, &config)?));
        stores.insert(key, store.clone());
        Ok(store)
    }

    fn lock<'a>(store: &'a Arc<Mutex<UserStore>>) -> MutexGuard<'a, UserStore> {
        store.lock().expect("store lock poisoned")
    }

    // ------------------------------------------------------------------
    // WRITE PATH
    // ------------------------------------------------------------------

    /// Store one conversational turn: extract, graph, check, index.
    ///
    /// Never fails on extraction or provider trouble; the raw episode is
    /// durable before anything optional runs.
    pub fn add(
        &self,
        content: &str,
        user_id: &str,
        character_id: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<AddResult> {
        let config = self.config.snapshot();
        let character_id = character_id.unwrap_or(DEFAULT_CHARACTER);
        let store = self.store(user_id, character_id)?;
        let mut store = Self::lock(&store);

        let role = metadata
            .as_ref()
            .and_then(|m| m.get("role"))
            .and_then(|r| r.as_str())
            .map(|r| {
                if r == "assistant" {
                    Role::Assistant
                } else {
                    Role::User
                }
            })
            .unwrap_or(Role::User);

        let turn_number = store.episodes.last_turn_number() + 1;
        let episode = Episode::new(role, content, turn_number, user_id, character_id);
        let episode_id = episode.id.clone();
        let timestamp = episode.timestamp;
        store.episodes.save(episode)?;

        let mut warnings: Vec<String> = Vec::new();

        // Index the raw turn (this is what the fallback scan guarantees on)
        let doc_id = DocId::memory(&episode_id);
        let embedding = match self.embeddings.encode(content) {
            Ok(embedding) => embedding,
            Err(e) => {
                warnings.push(format!("embedding unavailable: {e}"));
                None
            }
        };
        store.index_document(&doc_id, content, embedding)?;
        store.graph.temporal_index_mut().add(TemporalEntry {
            doc_id: doc_id.clone(),
            fact_range: TimeRange::new(Some(timestamp), Some(timestamp)),
            known_at: Some(timestamp),
            system_range: TimeRange::new(Some(timestamp), None),
            subject: String::new(),
            predicate: String::new(),
        });

        // Extraction (optional quality, never a failure)
        let extractor = Extractor::new(config.extractor.mode);
        let extraction = extractor.extract(
            content,
            self.llm.as_deref(),
            Some(self.budget.as_ref()),
        );
        warnings.extend(extraction.warnings.iter().cloned());

        // Entities: three-stage dedup, then node upsert + mention index
        let mut entity_names = Vec::new();
        let mut entity_ids = Vec::new();
        for extracted in &extraction.entities {
            let candidate = DedupItem::new(
                uuid::Uuid::new_v4().to_string(),
                extracted.name.as_str(),
                "",
            );
            let decision = store.dedup.match_item(
                &candidate,
                &self.embeddings,
                self.llm.as_deref(),
                Some(self.budget.as_ref()),
            );
            let canonical_name = match &decision.kind {
                MatchKind::New => extracted.name.clone(),
                _ => decision
                    .matched_id
                    .as_ref()
                    .and_then(|id| store.graph.get_node(id))
                    .map(|node| node.name.clone())
                    .unwrap_or_else(|| extracted.name.clone()),
            };

            let node = store.graph.add_node(
                &canonical_name,
                NodeType::Entity,
                "",
                "",
                HashMap::new(),
                if canonical_name == extracted.name {
                    vec![]
                } else {
                    vec![extracted.name.clone()]
                },
            );
            if matches!(decision.kind, MatchKind::New) {
                store
                    .dedup
                    .add_to_index(DedupItem::new(node.id.as_str(), node.name.as_str(), ""));
            }
            store.entity.add_mention(&canonical_name, &doc_id);
            entity_names.push(canonical_name);
            entity_ids.push(node.id);
        }

        // Relations: graph edges + contradiction handling
        let mut relation_ids = Vec::new();
        for relation in &extraction.relations {
            let spec = EdgeSpec {
                subject: relation.subject.clone(),
                predicate: relation.predicate.clone(),
                object: relation.object.clone(),
                fact: relation.fact.clone(),
                valid_from: relation.valid_from.or(Some(timestamp)),
                valid_until: relation.valid_until,
                source_text: content.to_string(),
                confidence: relation.confidence,
                source_episodes: vec![episode_id.clone()],
                check_contradiction: config.contradiction.enabled,
            };

            // Split borrows: detection borrows the manager immutably while
            // the graph mutates
            let (fact, contradictions) = {
                let UserStore {
                    graph,
                    contradictions,
                    ..
                } = &mut *store;
                graph.add_edge(spec, Some(&*contradictions))?
            };

            // Index the fact restatement for retrieval
            let edge_doc_id = DocId::edge(&fact.id);
            let fact_embedding = self.embeddings.encode(&fact.fact).unwrap_or(None);
            store.index_document(&edge_doc_id, &fact.fact, fact_embedding)?;

            for contradiction in contradictions {
                warnings.push(format!(
                    "contradiction ({:?}, {:.2}): \"{}\" vs \"{}\"",
                    contradiction.contradiction_type,
                    contradiction.confidence,
                    contradiction.old_fact_text,
                    contradiction.new_fact_text,
                ));
                let contradiction_id = contradiction.id.clone();
                store.contradictions.add_pending(contradiction)?;
                if config.contradiction.auto_resolve {
                    let strategy = match config.contradiction.default_resolution {
                        ResolutionStrategy::Manual => ResolutionStrategy::Supersede,
                        other => other,
                    };
                    let UserStore {
                        graph,
                        contradictions,
                        ..
                    } = &mut *store;
                    contradictions.resolve(graph, &contradiction_id, strategy, "system")?;
                }
            }
            relation_ids.push(fact.id);
        }

        // Persistent conditions (mode-gated)
        if config.mode.conditions_enabled() {
            let found: Vec<PersistentCondition> =
                store.conditions.extract_from_text(content);
            for condition in found {
                let condition_id = store.conditions.add(condition)?;
                let text = store
                    .conditions
                    .get(&condition_id)
                    .map(|c| c.content.clone());
                if let Some(text) = text {
                    let ctx_doc = DocId::condition(user_id, character_id, &condition_id);
                    store.index_document(&ctx_doc, &text, None)?;
                }
            }
        }

        // Absolute rules (mode-gated, LLM-assisted, never blocking)
        if config.mode.rules_enabled() && !store.rules.rules().is_empty() {
            let rule_texts = store.rules.texts();
            for violation in check_absolute_rules(
                content,
                &rule_texts,
                self.llm.as_deref(),
                Some(self.budget.as_ref()),
            ) {
                warnings.push(format!(
                    "rule violation ({:.2}): {} - {}",
                    violation.confidence, violation.rule, violation.reason
                ));
            }
        }

        store
            .episodes
            .update_links(&episode_id, &[], &entity_ids, &relation_ids)?;
        store.flush()?;

        Ok(AddResult {
            id: episode_id,
            entities: entity_names,
            consistency_warnings: warnings,
        })
    }

    /// Declare the absolute rules for a (user, character) scope
    pub fn set_absolute_rules(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        rules: Vec<String>,
    ) -> Result<()> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        Self::lock(&store).rules.set_rules(rules)
    }

    // ------------------------------------------------------------------
    // READ PATH
    // ------------------------------------------------------------------

    /// Layered retrieval over one user's memories
    pub fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        filters: Option<SearchFilters>,
    ) -> Result<Vec<SearchResult>> {
        let config = self.config.snapshot();
        let filters = filters.unwrap_or_default();
        let character_id = filters
            .character_id
            .clone()
            .unwrap_or_else(|| DEFAULT_CHARACTER.to_string());
        let store = self.store(user_id, &character_id)?;
        let store = Self::lock(&store);

        let keywords = crate::extract::extract_keywords(query);
        let entities: Vec<String> = crate::extract::extract_entities(query)
            .into_iter()
            .map(|e| e.name)
            .collect();
        let temporal_context = TemporalContext {
            start: filters.time_start,
            end: filters.time_end,
            reference: filters.time_end,
        };

        let retrieved = store
            .retriever(&config, &self.embeddings, self.cross_encoder.as_deref())
            .retrieve(
                query,
                &entities,
                &keywords,
                top_k,
                temporal_context
                    .has_time_constraint()
                    .then_some(&temporal_context),
            );

        Ok(retrieved
            .items
            .into_iter()
            .map(|item| {
                let (metadata, entities) = self.describe_doc(&store, &item.id);
                SearchResult {
                    id: item.id,
                    score: item.score,
                    content: item.content,
                    metadata,
                    entities,
                }
            })
            .collect())
    }

    /// Async search: strict superset of [`search`] that adds the L11 judge
    ///
    /// [`search`]: MemoryEngine::search
    pub async fn search_async(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        filters: Option<SearchFilters>,
    ) -> Result<Vec<SearchResult>> {
        let config = self.config.snapshot();
        let mut results = self.search(query, user_id, top_k, filters)?;

        if config.retrieval.l11_enabled {
            if let Some(llm) = self.llm.clone() {
                let mut items: Vec<crate::retrieval::RetrievalResultItem> = results
                    .iter()
                    .map(|r| crate::retrieval::RetrievalResultItem {
                        id: r.id.clone(),
                        score: r.score,
                        content: r.content.clone(),
                        entities: r.entities.clone(),
                    })
                    .collect();
                if llm_judge_rerank(
                    query,
                    &mut items,
                    llm,
                    &config.retrieval,
                    Some(self.budget.as_ref()),
                )
                .await
                {
                    let by_id: HashMap<String, f32> =
                        items.iter().map(|i| (i.id.clone(), i.score)).collect();
                    for result in &mut results {
                        if let Some(score) = by_id.get(&result.id) {
                            result.score = *score;
                        }
                    }
                    results.sort_by(|a, b| {
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.id.cmp(&b.id))
                    });
                }
            }
        }
        Ok(results)
    }

    fn describe_doc(
        &self,
        store: &UserStore,
        doc_id: &str,
    ) -> (serde_json::Value, Vec<String>) {
        match DocId::parse(doc_id) {
            Some(DocId::Memory(id)) => {
                if let Some(episode) = store.episodes.get(&id) {
                    let entities = episode
                        .entity_ids
                        .iter()
                        .filter_map(|eid| store.graph.get_node(eid))
                        .map(|n| n.name.clone())
                        .collect();
                    let metadata = serde_json::json!({
                        "kind": "episode",
                        "role": episode.role.as_str(),
                        "turnNumber": episode.turn_number,
                        "timestamp": episode.timestamp,
                    });
                    return (metadata, entities);
                }
            }
            Some(DocId::Edge(id)) => {
                if let Some(fact) = store.graph.get_edge(&id) {
                    let metadata = serde_json::json!({
                        "kind": "fact",
                        "predicate": fact.predicate,
                        "confidence": fact.confidence,
                        "validFrom": fact.valid_from,
                        "validUntil": fact.valid_until,
                    });
                    return (metadata, Vec::new());
                }
            }
            Some(DocId::Condition(_)) => {
                return (serde_json::json!({"kind": "condition"}), Vec::new());
            }
            _ => {}
        }
        (serde_json::Value::Null, Vec::new())
    }

    /// Assemble a token-budgeted prompt context
    pub fn build_context(
        &self,
        query: &str,
        user_id: &str,
        character_id: Option<&str>,
        max_tokens: usize,
        include_recent: Option<usize>,
    ) -> Result<BuiltContext> {
        let config = self.config.snapshot();
        let character_id = character_id.unwrap_or(DEFAULT_CHARACTER);
        let store = self.store(user_id, character_id)?;
        let mut store = Self::lock(&store);

        // Over-fetch relative to the budget; the greedy fill trims
        let fetch_k = config.retrieval.final_top_k.max(10) * 2;
        let keywords = crate::extract::extract_keywords(query);
        let entities: Vec<String> = crate::extract::extract_entities(query)
            .into_iter()
            .map(|e| e.name)
            .collect();
        let retrieved = store
            .retriever(&config, &self.embeddings, self.cross_encoder.as_deref())
            .retrieve(query, &entities, &keywords, fetch_k, None);

        let conditions = if config.mode.conditions_enabled() {
            store.conditions.consolidate()?
        } else {
            Vec::new()
        };
        let rule_texts = if config.mode.rules_enabled() {
            store.rules.texts()
        } else {
            Vec::new()
        };

        let retrieved_texts: Vec<(String, String)> = {
            let UserStore {
                episodes,
                graph,
                conditions,
                ..
            } = &*store;
            let sources = ContextSources {
                episode_content: &|id: &str| episodes.get(id).map(|ep| ep.content.clone()),
                fact_text: &|id: &str| graph.get_edge(id).map(|f| f.fact.clone()),
                node_text: &|id: &str| {
                    graph.get_node(id).map(|n| {
                        if n.summary.is_empty() {
                            n.name.clone()
                        } else {
                            n.summary.clone()
                        }
                    })
                },
                condition_text: &|id: &str| conditions.get(id).map(|c| c.content.clone()),
            };
            retrieved
                .items
                .iter()
                .filter_map(|item| {
                    dereference(&item.id, &sources).map(|text| (item.id.clone(), text))
                })
                .collect()
        };

        let recent_turns: Vec<String> = {
            let mut recent = store.episodes.recent(include_recent.unwrap_or(10));
            recent.reverse();
            recent
                .iter()
                .map(|ep| format!("{}: {}", ep.role.as_str(), ep.content))
                .collect()
        };

        let assembled = assemble(&ContextInputs {
            conditions: &conditions,
            rules: &rule_texts,
            retrieved: &retrieved_texts,
            recent_turns: &recent_turns,
            max_tokens,
        });
        store.conditions.mark_used(&assembled.used_condition_ids)?;

        Ok(BuiltContext {
            context: assembled.context,
            token_estimate: assembled.token_estimate,
        })
    }

    // ------------------------------------------------------------------
    // GRAPH QUERIES
    // ------------------------------------------------------------------

    pub fn query_at_time(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        subject: &str,
        as_of: DateTime<Utc>,
        predicate: Option<&str>,
    ) -> Result<Vec<TemporalFact>> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.graph.query_at_time(subject, as_of, predicate))
    }

    pub fn query_timeline(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        subject: &str,
        predicate: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<(DateTime<Utc>, TemporalFact, FactEventKind)>> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.graph.query_timeline(subject, predicate, start, end))
    }

    pub fn compare_snapshots(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        subject: &str,
        time1: DateTime<Utc>,
        time2: DateTime<Utc>,
    ) -> Result<SnapshotDiff> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.graph.compare_snapshots(subject, time1, time2))
    }

    pub fn bfs(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        start: &str,
        max_depth: u32,
        direction: Direction,
    ) -> Result<std::collections::BTreeMap<u32, Vec<(String, TemporalFact)>>> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.graph.bfs(start, max_depth, None, None, direction))
    }

    pub fn find_path(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        source: &str,
        target: &str,
        max_depth: u32,
    ) -> Result<Option<Vec<(String, TemporalFact)>>> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.graph.find_path(source, target, max_depth, None))
    }

    pub fn get_neighbors(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        node: &str,
        direction: Direction,
    ) -> Result<Vec<(String, TemporalFact)>> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.graph.get_neighbors(node, direction))
    }

    // ------------------------------------------------------------------
    // CONTRADICTION OPS
    // ------------------------------------------------------------------

    /// Re-run detection for an existing fact against its subject's live facts
    pub fn detect_contradictions(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        fact_id: &str,
    ) -> Result<Vec<Contradiction>> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        let fact = store
            .graph
            .get_edge(fact_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("fact {fact_id}")))?;
        let subject_name = store
            .graph
            .get_node(&fact.subject)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| fact.subject.clone());
        let existing = store.graph.get_edges_by_subject(&subject_name, None, None);
        Ok(store.contradictions.detect(
            &fact,
            &existing,
            self.llm.as_deref(),
            Some(self.budget.as_ref()),
            None,
        ))
    }

    pub fn list_pending_contradictions(
        &self,
        user_id: &str,
        character_id: Option<&str>,
    ) -> Result<Vec<Contradiction>> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.contradictions.list_pending().into_iter().cloned().collect())
    }

    pub fn resolve_contradiction(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        contradiction_id: &str,
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionResult> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let mut store = Self::lock(&store);
        let result = {
            let UserStore {
                graph,
                contradictions,
                ..
            } = &mut *store;
            contradictions.resolve(graph, contradiction_id, strategy, "caller")?
        };
        store.flush()?;
        Ok(result)
    }

    pub fn contradiction_stats(
        &self,
        user_id: &str,
        character_id: Option<&str>,
    ) -> Result<ContradictionStats> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        Ok(store.contradictions.stats(self.llm.is_some()))
    }

    // ------------------------------------------------------------------
    // ADMINISTRATION
    // ------------------------------------------------------------------

    /// Swap in a fresh configuration snapshot (file + env)
    pub fn reload_config(&self) -> Result<()> {
        self.config.reload()
    }

    /// Delete every store under a user's namespace. Requires `confirm`.
    pub fn clear(&self, user_id: &str, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(EngineError::Conflict(
                "clear requires explicit confirmation".into(),
            ));
        }
        let mut stores = self.stores.write().expect("stores lock poisoned");
        stores.retain(|(user, _), _| user != user_id);

        let user_dir = StorePaths::new(&self.data_root, user_id, "x")
            .root
            .parent()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| EngineError::Fatal("bad user dir".into()))?;
        if user_dir.exists() {
            std::fs::remove_dir_all(&user_dir)?;
        }
        tracing::info!(user_id, "cleared user namespace");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let stores = self.stores.read().expect("stores lock poisoned");
        let mut stats = EngineStats {
            store_count: stores.len(),
            episode_count: 0,
            node_count: 0,
            edge_count: 0,
            pending_contradictions: 0,
            usage: self.budget.stats(),
        };
        for store in stores.values() {
            let store = Self::lock(store);
            let graph_stats = store.graph.stats();
            stats.episode_count += store.episodes.count();
            stats.node_count += graph_stats.active_node_count;
            stats.edge_count += graph_stats.live_edge_count;
            stats.pending_contradictions += store.contradictions.list_pending().len();
        }
        stats
    }

    /// Population counts for one store, for index / graph equivalence checks
    pub fn diagnostics(
        &self,
        user_id: &str,
        character_id: Option<&str>,
    ) -> Result<StoreDiagnostics> {
        let store = self.store(user_id, character_id.unwrap_or(DEFAULT_CHARACTER))?;
        let store = Self::lock(&store);
        let graph_stats = store.graph.stats();
        Ok(StoreDiagnostics {
            episode_count: store.episodes.count(),
            active_node_count: graph_stats.active_node_count,
            live_edge_count: graph_stats.live_edge_count,
            ngram_doc_count: store.ngram.doc_count(),
            inverted_doc_count: store.inverted.doc_count(),
            fulltext_doc_count: store.fulltext.doc_count(),
            temporal_entry_count: store.graph.temporal_index().count(),
            vector_count: store.vector.len(),
            active_condition_count: store.conditions.count_active(),
        })
    }

    /// Force-flush every open store to disk
    pub fn flush_all(&self) -> Result<()> {
        let stores = self.stores.read().expect("stores lock poisoned");
        for store in stores.values() {
            Self::lock(store).flush()?;
        }
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

    fn engine(dir: &std::path::Path) -> MemoryEngine {
        let config = EngineConfig {
            data_root: Some(dir.to_path_buf()),
            ..Default::default()
        };
        MemoryEngine::new(config).unwrap()
    }

    #[test]
    fn test_add_returns_entities_and_stores_episode() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        let result = engine.add("I live in Berlin.", "u1", None, None).unwrap();
        assert!(result.entities.iter().any(|e| e == "Berlin"));

        let stats = engine.stats();
        assert_eq!(stats.episode_count, 1);
        assert!(stats.node_count >= 1);
    }

    #[test]
    fn test_search_finds_added_turn() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.add("I live in Berlin.", "u1", None, None).unwrap();
        engine.add("The sky is blue.", "u1", None, None).unwrap();

        let results = engine
            .search("where does the user live", "u1", 3, None)
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().take(3).any(|r| r.content.contains("Berlin")));
    }

    #[test]
    fn test_user_isolation() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.add("my secret is 12345", "alice", None, None).unwrap();

        let bob_results = engine.search("12345", "bob", 10, None).unwrap();
        assert!(bob_results.is_empty());

        let alice_results = engine.search("12345", "alice", 10, None).unwrap();
        assert!(!alice_results.is_empty());
    }

    #[test]
    fn test_contradiction_warning_on_add() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.add("Alice loves Bob.", "u1", None, None).unwrap();
        let second = engine.add("Alice hates Bob.", "u1", None, None).unwrap();

        assert!(
            second
                .consistency_warnings
                .iter()
                .any(|w| w.contains("contradiction")),
            "warnings: {:?}",
            second.consistency_warnings
        );
        let pending = engine.list_pending_contradictions("u1", None).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.add("hello there", "u1", None, None).unwrap();
        assert!(engine.clear("u1", false).is_err());
        engine.clear("u1", true).unwrap();
        assert!(engine.search("hello", "u1", 10, None).unwrap().is_empty());
    }

    #[test]
    fn test_build_context_respects_budget() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        for i in 0..15 {
            engine
                .add(
                    &format!("Turn number {i} talks about interesting topic {i}"),
                    "u1",
                    None,
                    None,
                )
                .unwrap();
        }
        let built = engine
            .build_context("interesting topic", "u1", None, 200, Some(5))
            .unwrap();
        assert!(built.token_estimate <= 200);
        assert!(!built.context.is_empty());
    }
}
