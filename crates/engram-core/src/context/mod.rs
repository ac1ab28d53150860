//! Context assembler
//!
//! Turns ranked doc ids into one token-budgeted prompt string. This module is
//! the only place that knows the doc-id prefix convention; everything else
//! passes opaque ids around.
//!
//! Output layout is stable and documented:
//!
//! ```text
//! [persistent_conditions]
//! - ...
//! [absolute_rules]
//! - ...
//! [retrieved_memory]
//! - ...
//! [recent_turns]
//! role: ...
//! ```
//!
//! Sections are omitted when empty. The budget is spent greedily in priority
//! order rules -> persistent conditions -> retrieved -> recent turns; a
//! section's header and separator are charged the moment its first line is
//! admitted, so the rendered estimate never exceeds the budget.

use crate::index::DocId;
use crate::memory::PersistentCondition;

// ============================================================================
// TOKEN ESTIMATION
// ============================================================================

/// Token estimate for mixed-script text: CJK chars count 1/2 token, everything
/// else 1/4, blended by actual character composition.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if crate::index::is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    cjk.div_ceil(2) + other.div_ceil(4)
}

// ============================================================================
// DEREFERENCE
// ============================================================================

/// Lookup functions into the object stores, supplied by the engine
pub struct ContextSources<'a> {
    pub episode_content: &'a dyn Fn(&str) -> Option<String>,
    pub fact_text: &'a dyn Fn(&str) -> Option<String>,
    pub node_text: &'a dyn Fn(&str) -> Option<String>,
    pub condition_text: &'a dyn Fn(&str) -> Option<String>,
}

/// Resolve a namespaced doc id to display text. Unknown prefixes and
/// foreshadowing ids (produced by an external tracker) resolve to nothing.
pub fn dereference(doc_id: &str, sources: &ContextSources<'_>) -> Option<String> {
    match DocId::parse(doc_id)? {
        DocId::Memory(id) => (sources.episode_content)(&id),
        DocId::Edge(id) => (sources.fact_text)(&id),
        DocId::Node(id) => (sources.node_text)(&id),
        DocId::Condition(id) => (sources.condition_text)(&id),
        DocId::Foreshadow(_) => None,
    }
}

// ============================================================================
// ASSEMBLY
// ============================================================================

/// Inputs for one assembly pass; conditions arrive already consolidated
pub struct ContextInputs<'a> {
    pub conditions: &'a [PersistentCondition],
    pub rules: &'a [String],
    /// (doc id, resolved text), ranked best-first
    pub retrieved: &'a [(String, String)],
    /// "role: content" lines, oldest first
    pub recent_turns: &'a [String],
    pub max_tokens: usize,
}

/// The assembled prompt string plus bookkeeping
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub context: String,
    /// Conditions that made it in (for mark_used)
    pub used_condition_ids: Vec<String>,
    /// Retrieved doc ids that made it in
    pub included_doc_ids: Vec<String>,
    pub token_estimate: usize,
}

const CONDITIONS_HEADER: &str = "[persistent_conditions]";
const RULES_HEADER: &str = "[absolute_rules]";
const RETRIEVED_HEADER: &str = "[retrieved_memory]";
const RECENT_HEADER: &str = "[recent_turns]";

/// Charge one line against the budget. The first admitted line of a section
/// also pays for its header and the blank-line separator, so the rendered
/// string can never exceed what was budgeted.
fn admit(header: &str, line: &str, opened: &mut bool, remaining: &mut usize) -> bool {
    let mut cost = estimate_tokens(line) + 1;
    if !*opened {
        cost += estimate_tokens(header) + 2;
    }
    if cost > *remaining {
        return false;
    }
    *remaining -= cost;
    *opened = true;
    true
}

/// Greedy-fill the four sections against the token budget
pub fn assemble(inputs: &ContextInputs<'_>) -> AssembledContext {
    let mut remaining = inputs.max_tokens;
    let mut out = AssembledContext::default();

    // Budget in priority order
    let mut rule_lines = Vec::new();
    let mut rules_open = false;
    for rule in inputs.rules {
        let line = format!("- {rule}");
        if admit(RULES_HEADER, &line, &mut rules_open, &mut remaining) {
            rule_lines.push(line);
        } else {
            break;
        }
    }

    let mut condition_lines = Vec::new();
    let mut conditions_open = false;
    for condition in inputs.conditions {
        let line = format!("- {}", condition.content);
        if admit(CONDITIONS_HEADER, &line, &mut conditions_open, &mut remaining) {
            condition_lines.push(line);
            out.used_condition_ids.push(condition.id.clone());
        } else {
            break;
        }
    }

    let mut retrieved_lines = Vec::new();
    let mut retrieved_open = false;
    for (doc_id, text) in inputs.retrieved {
        if text.trim().is_empty() {
            continue;
        }
        let line = format!("- {}", text.trim());
        if admit(RETRIEVED_HEADER, &line, &mut retrieved_open, &mut remaining) {
            retrieved_lines.push(line);
            out.included_doc_ids.push(doc_id.clone());
        } else {
            break;
        }
    }

    let mut recent_lines = Vec::new();
    let mut recent_open = false;
    for turn in inputs.recent_turns {
        let line = turn.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if admit(RECENT_HEADER, &line, &mut recent_open, &mut remaining) {
            recent_lines.push(line);
        } else {
            break;
        }
    }

    // Render in layout order, skipping empty sections
    let mut sections: Vec<String> = Vec::new();
    for (header, lines) in [
        (CONDITIONS_HEADER, &condition_lines),
        (RULES_HEADER, &rule_lines),
        (RETRIEVED_HEADER, &retrieved_lines),
        (RECENT_HEADER, &recent_lines),
    ] {
        if !lines.is_empty() {
            sections.push(format!("{header}\n{}", lines.join("\n")));
        }
    }

    out.context = sections.join("\n\n");
    out.token_estimate = estimate_tokens(&out.context);
    out
}

// ============================================================================
// TESTS
// ============================================================================
