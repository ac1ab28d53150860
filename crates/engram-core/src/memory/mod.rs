//! Memory module - core types and stores
//!
//! The tri-temporal data model:
//! - Nodes (entities, episodes, communities) owned by the graph
//! - Temporal facts with fact / knowledge / system time axes
//! - Episodes retained verbatim in an append-only log
//! - Persistent conditions with reinforced, decaying confidence
//! - Absolute rules, opaque user-declared constraints

mod condition;
mod episode;
mod fact;
mod node;
mod rules;

pub use condition::{
    ConditionConfig, ConditionTracker, ConditionType, PersistentCondition,
};
pub use episode::{Episode, EpisodeStore, Role};
pub use fact::TemporalFact;
pub use node::{normalize_name, Node, NodeType};
pub use rules::{AbsoluteRule, RuleStore};
