//! Contradiction detection and resolution
//!
//! Given a candidate fact and the existing active facts that share its
//! subject, detect conflicts and propose resolutions. Detection runs by
//! rules, by LLM, or in MIXED / AUTO combinations; resolutions mutate the
//! graph (SUPERSEDE, REJECT) or record the pair for later (MANUAL). Pending
//! contradictions are durable and survive restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::graph::TemporalGraph;
use crate::memory::TemporalFact;
use crate::providers::{BudgetManager, LlmProvider};
use crate::storage::{atomic_write_json, load_json_or_quarantine};

// ============================================================================
// TYPES
// ============================================================================

/// How two facts conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContradictionType {
    /// Same subject and predicate, different object, overlapping validity
    Direct,
    /// Same triple with conflicting time ranges
    Temporal,
    /// Mutually exclusive predicates over the same pair
    Logical,
    /// Plausibly coexisting (state change over disjoint time)
    Soft,
}

impl ContradictionType {
    fn base_confidence(&self) -> f32 {
        match self {
            ContradictionType::Direct => 0.8,
            ContradictionType::Logical => 0.7,
            ContradictionType::Temporal => 0.6,
            ContradictionType::Soft => 0.5,
        }
    }
}

/// Which detector runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    /// Rules only, zero cost
    #[default]
    Rule,
    /// LLM only
    Llm,
    /// Rules first, LLM confirms each hit
    Mixed,
    /// Rules first, LLM only for complex pairs
    Auto,
}

impl DetectionStrategy {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "llm" | "llm_only" => DetectionStrategy::Llm,
            "mixed" | "hybrid" => DetectionStrategy::Mixed,
            "auto" => DetectionStrategy::Auto,
            _ => DetectionStrategy::Rule,
        }
    }
}

/// What to do with a detected contradiction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// New fact survives; old fact's validity closes at new.valid_from
    Supersede,
    /// Both remain valid
    Coexist,
    /// New fact is expired immediately
    Reject,
    /// Persist the pair and wait for an explicit resolve call
    #[default]
    Manual,
}

impl ResolutionStrategy {
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "supersede" => ResolutionStrategy::Supersede,
            "coexist" => ResolutionStrategy::Coexist,
            "reject" => ResolutionStrategy::Reject,
            _ => ResolutionStrategy::Manual,
        }
    }
}

/// A detected conflict between two facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: String,
    pub old_fact_id: String,
    pub new_fact_id: String,
    pub old_fact_text: String,
    pub new_fact_text: String,
    pub contradiction_type: ContradictionType,
    pub confidence: f32,
    #[serde(default)]
    pub notes: String,
}

impl Contradiction {
    pub fn new(
        old_fact: &TemporalFact,
        new_fact: &TemporalFact,
        contradiction_type: ContradictionType,
        confidence: f32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            old_fact_id: old_fact.id.clone(),
            new_fact_id: new_fact.id.clone(),
            old_fact_text: old_fact.fact.clone(),
            new_fact_text: new_fact.fact.clone(),
            contradiction_type,
            confidence: confidence.clamp(0.0, 1.0),
            notes: String::new(),
        }
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub success: bool,
    pub action: ResolutionStrategy,
    pub old_fact_id: String,
    pub new_fact_id: String,
    pub message: String,
}

/// Durable record wrapping a contradiction through its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionRecord {
    pub contradiction: Contradiction,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution: Option<ResolutionStrategy>,
    #[serde(default)]
    pub resolver: String,
    #[serde(default)]
    pub notes: String,
}

/// Manager statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionStats {
    pub pending_count: usize,
    pub resolved_count: usize,
    pub strategy: DetectionStrategy,
    pub auto_resolve: bool,
    pub llm_enabled: bool,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Pairs of predicates that cannot hold together over the same subject and
/// object while their validity overlaps.
const EXCLUSIVE_PREDICATES: [(&str, &str); 4] = [
    ("LOVES", "HATES"),
    ("IS_FRIEND_OF", "IS_ENEMY_OF"),
    ("ALIVE", "DEAD"),
    ("MARRIED_TO", "DIVORCED_FROM"),
];

/// Detects conflicts and owns the durable pending / resolved logs
pub struct ContradictionManager {
    pending_path: PathBuf,
    resolved_path: PathBuf,
    pending: Vec<ContradictionRecord>,
    resolved: Vec<ContradictionRecord>,
    pub strategy: DetectionStrategy,
    pub auto_resolve: bool,
    pub default_resolution: ResolutionStrategy,
}

impl ContradictionManager {
    pub fn open(
        contradictions_dir: &Path,
        strategy: DetectionStrategy,
        auto_resolve: bool,
        default_resolution: ResolutionStrategy,
    ) -> Result<Self> {
        let pending_path = contradictions_dir.join("pending.json");
        let resolved_path = contradictions_dir.join("resolved.json");
        let pending = load_json_or_quarantine(&pending_path)?.unwrap_or_default();
        let resolved = load_json_or_quarantine(&resolved_path)?.unwrap_or_default();
        Ok(Self {
            pending_path,
            resolved_path,
            pending,
            resolved,
            strategy,
            auto_resolve,
            default_resolution,
        })
    }

    fn save(&self) -> Result<()> {
        atomic_write_json(&self.pending_path, &self.pending)?;
        atomic_write_json(&self.resolved_path, &self.resolved)
    }

    // ------------------------------------------------------------------
    // Detection
    // ------------------------------------------------------------------

    /// Detect conflicts between a new fact and the existing facts sharing its
    /// subject. The LLM is consulted per the configured strategy and only
    /// when the budget allows.
    pub fn detect(
        &self,
        new_fact: &TemporalFact,
        existing: &[TemporalFact],
        llm: Option<&dyn LlmProvider>,
        budget: Option<&BudgetManager>,
        context: Option<&str>,
    ) -> Vec<Contradiction> {
        let mut found = Vec::new();
        for old_fact in existing {
            if old_fact.id == new_fact.id || old_fact.expired_at.is_some() {
                continue;
            }
            if let Some(contradiction) =
                self.detect_pair(old_fact, new_fact, llm, budget, context)
            {
                found.push(contradiction);
            }
        }
        found
    }

    fn detect_pair(
        &self,
        old_fact: &TemporalFact,
        new_fact: &TemporalFact,
        llm: Option<&dyn LlmProvider>,
        budget: Option<&BudgetManager>,
        context: Option<&str>,
    ) -> Option<Contradiction> {
        match self.strategy {
            DetectionStrategy::Rule => self.detect_by_rules(old_fact, new_fact),
            DetectionStrategy::Llm => {
                llm.and_then(|llm| self.detect_by_llm(old_fact, new_fact, llm, budget, context))
            }
            DetectionStrategy::Mixed => {
                let mut rule_hit = self.detect_by_rules(old_fact, new_fact)?;
                if let Some(llm) = llm {
                    if let Some(llm_hit) =
                        self.detect_by_llm(old_fact, new_fact, llm, budget, context)
                    {
                        rule_hit.confidence = rule_hit.confidence.max(llm_hit.confidence);
                    }
                }
                Some(rule_hit)
            }
            DetectionStrategy::Auto => {
                if let Some(hit) = self.detect_by_rules(old_fact, new_fact) {
                    return Some(hit);
                }
                if Self::is_complex_pair(old_fact, new_fact) {
                    if let Some(llm) = llm {
                        return self.detect_by_llm(old_fact, new_fact, llm, budget, context);
                    }
                }
                None
            }
        }
    }

    fn detect_by_rules(
        &self,
        old_fact: &TemporalFact,
        new_fact: &TemporalFact,
    ) -> Option<Contradiction> {
        let ty = Self::rule_direct(old_fact, new_fact)
            .or_else(|| Self::rule_temporal(old_fact, new_fact))
            .or_else(|| Self::rule_exclusive(old_fact, new_fact))?;
        let confidence = Self::compose_confidence(old_fact, new_fact, ty);
        Some(Contradiction::new(old_fact, new_fact, ty, confidence))
    }

    fn rule_direct(old: &TemporalFact, new: &TemporalFact) -> Option<ContradictionType> {
        if old.subject == new.subject
            && old.predicate == new.predicate
            && old.object != new.object
            && old.overlaps(new)
        {
            Some(ContradictionType::Direct)
        } else {
            None
        }
    }

    fn rule_temporal(old: &TemporalFact, new: &TemporalFact) -> Option<ContradictionType> {
        if old.subject != new.subject
            || old.predicate != new.predicate
            || old.object != new.object
        {
            return None;
        }
        // Same triple with disjoint or gapped validity intervals
        // (missing bounds are unbounded, so two open-ended duplicates overlap
        // and stay out of here)
        if !old.overlaps(new) {
            Some(ContradictionType::Temporal)
        } else {
            None
        }
    }

    fn rule_exclusive(old: &TemporalFact, new: &TemporalFact) -> Option<ContradictionType> {
        if old.subject != new.subject || old.object != new.object || !old.overlaps(new) {
            return None;
        }
        let conflicting = EXCLUSIVE_PREDICATES.iter().any(|(p1, p2)| {
            (old.predicate == *p1 && new.predicate == *p2)
                || (old.predicate == *p2 && new.predicate == *p1)
        });
        if conflicting {
            Some(ContradictionType::Logical)
        } else {
            None
        }
    }

    /// Type base blended 70/30 with the mean confidence of the two facts
    fn compose_confidence(
        old: &TemporalFact,
        new: &TemporalFact,
        ty: ContradictionType,
    ) -> f32 {
        let base = ty.base_confidence();
        let fact_confidence = (old.confidence + new.confidence) / 2.0;
        (base * 0.7 + fact_confidence * 0.3).min(1.0)
    }

    /// Pairs worth an LLM look in AUTO mode: long fact text, or different
    /// predicates that might be semantically related
    fn is_complex_pair(old: &TemporalFact, new: &TemporalFact) -> bool {
        if old.fact.len() > 100 || new.fact.len() > 100 {
            return true;
        }
        old.predicate != new.predicate
            && old.subject == new.subject
            && old.object == new.object
    }

    fn detect_by_llm(
        &self,
        old_fact: &TemporalFact,
        new_fact: &TemporalFact,
        llm: &dyn LlmProvider,
        budget: Option<&BudgetManager>,
        context: Option<&str>,
    ) -> Option<Contradiction> {
        let prompt = Self::llm_prompt(old_fact, new_fact, context);
        if let Some(budget) = budget {
            let cost = BudgetManager::estimate_cost(prompt.len(), 200);
            if !budget.can_afford(cost, "contradiction_detect") {
                return None;
            }
        }

        let response = match llm.complete(&prompt, 200) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "LLM contradiction detection failed");
                return None;
            }
        };
        if let Some(budget) = budget {
            budget.record_usage(prompt.len() as u64 / 4, 50, llm.model());
        }

        let verdict: LlmVerdict = extract_json(&response)?;
        if !verdict.has_contradiction {
            return None;
        }
        let ty = match verdict.contradiction_type.as_deref() {
            Some("temporal") => ContradictionType::Temporal,
            Some("logical") => ContradictionType::Logical,
            Some("soft") => ContradictionType::Soft,
            _ => ContradictionType::Direct,
        };
        let mut contradiction = Contradiction::new(
            old_fact,
            new_fact,
            ty,
            verdict.confidence.unwrap_or(0.5),
        );
        contradiction.notes = verdict.reason.unwrap_or_default();
        Some(contradiction)
    }

    fn llm_prompt(old: &TemporalFact, new: &TemporalFact, context: Option<&str>) -> String {
        let mut prompt = format!(
            "Decide whether these two facts contradict each other.\n\n\
             Fact 1: {}\n- subject: {}\n- predicate: {}\n- object: {}\n- valid: {:?} to {:?}\n\n\
             Fact 2: {}\n- subject: {}\n- predicate: {}\n- object: {}\n- valid: {:?} to {:?}\n",
            old.fact,
            old.subject,
            old.predicate,
            old.object,
            old.valid_from,
            old.valid_until,
            new.fact,
            new.subject,
            new.predicate,
            new.object,
            new.valid_from,
            new.valid_until,
        );
        if let Some(ctx) = context {
            prompt.push_str(&format!("\nContext: {ctx}\n"));
        }
        prompt.push_str(
            "\nReply with JSON only:\n\
             {\"has_contradiction\": true|false, \"type\": \"direct|temporal|logical|soft\", \
             \"confidence\": 0.0, \"reason\": \"...\"}",
        );
        prompt
    }

    // ------------------------------------------------------------------
    // Pending log + resolution
    // ------------------------------------------------------------------

    pub fn add_pending(&mut self, contradiction: Contradiction) -> Result<()> {
        self.pending.push(ContradictionRecord {
            contradiction,
            detected_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            resolver: String::new(),
            notes: String::new(),
        });
        self.save()
    }

    pub fn list_pending(&self) -> Vec<&Contradiction> {
        self.pending.iter().map(|r| &r.contradiction).collect()
    }

    pub fn get(&self, contradiction_id: &str) -> Option<&ContradictionRecord> {
        self.pending
            .iter()
            .chain(self.resolved.iter())
            .find(|r| r.contradiction.id == contradiction_id)
    }

    /// Apply a resolution strategy to a recorded contradiction.
    ///
    /// SUPERSEDE is idempotent: a second application on the same pair leaves
    /// the graph untouched.
    pub fn resolve(
        &mut self,
        graph: &mut TemporalGraph,
        contradiction_id: &str,
        strategy: ResolutionStrategy,
        resolver: &str,
    ) -> Result<ResolutionResult> {
        let position = self
            .pending
            .iter()
            .position(|r| r.contradiction.id == contradiction_id);

        let contradiction = match position {
            Some(i) => self.pending[i].contradiction.clone(),
            None => {
                // Re-resolving an already resolved pair is a no-op success
                if let Some(record) = self
                    .resolved
                    .iter()
                    .find(|r| r.contradiction.id == contradiction_id)
                {
                    return Ok(ResolutionResult {
                        success: true,
                        action: record.resolution.unwrap_or(strategy),
                        old_fact_id: record.contradiction.old_fact_id.clone(),
                        new_fact_id: record.contradiction.new_fact_id.clone(),
                        message: "already resolved".into(),
                    });
                }
                return Err(EngineError::NotFound(format!(
                    "contradiction {contradiction_id}"
                )));
            }
        };

        let result = self.apply(graph, &contradiction, strategy)?;

        if strategy != ResolutionStrategy::Manual {
            if let Some(i) = position {
                let mut record = self.pending.remove(i);
                record.resolved_at = Some(Utc::now());
                record.resolution = Some(strategy);
                record.resolver = resolver.to_string();
                self.resolved.push(record);
            }
            self.save()?;
        }
        Ok(result)
    }

    /// Graph mutation for one contradiction. Also used directly on the write
    /// path when `auto_resolve` is on.
    pub fn apply(
        &self,
        graph: &mut TemporalGraph,
        contradiction: &Contradiction,
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionResult> {
        let mut result = ResolutionResult {
            success: true,
            action: strategy,
            old_fact_id: contradiction.old_fact_id.clone(),
            new_fact_id: contradiction.new_fact_id.clone(),
            message: String::new(),
        };

        match strategy {
            ResolutionStrategy::Supersede => {
                let boundary = graph
                    .get_edge(&contradiction.new_fact_id)
                    .map(|f| (f.valid_from.unwrap_or(f.known_at), f.known_at));
                let Some((valid_until, known_at)) = boundary else {
                    return Err(EngineError::NotFound(format!(
                        "fact {}",
                        contradiction.new_fact_id
                    )));
                };
                let changed =
                    graph.supersede_edge(&contradiction.old_fact_id, valid_until, known_at)?;
                result.message = if changed {
                    "old fact superseded".into()
                } else {
                    "old fact already superseded".into()
                };
            }
            ResolutionStrategy::Coexist => {
                result.message = "facts coexist".into();
            }
            ResolutionStrategy::Reject => {
                graph.expire_edge(&contradiction.new_fact_id)?;
                result.success = false;
                result.message = "new fact rejected".into();
            }
            ResolutionStrategy::Manual => {
                result.message = "awaiting manual resolution".into();
            }
        }
        Ok(result)
    }

    pub fn stats(&self, llm_enabled: bool) -> ContradictionStats {
        ContradictionStats {
            pending_count: self.pending.len(),
            resolved_count: self.resolved.len(),
            strategy: self.strategy,
            auto_resolve: self.auto_resolve,
            llm_enabled,
        }
    }
}

#[derive(Deserialize)]
struct LlmVerdict {
    has_contradiction: bool,
    #[serde(rename = "type")]
    contradiction_type: Option<String>,
    confidence: Option<f32>,
    reason: Option<String>,
}

/// Pull the first JSON object out of a possibly chatty LLM response
pub(crate) fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

// ============================================================================
// TESTS
// ============================================================================
