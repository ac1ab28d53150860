//! Index family
//!
//! Keyword, n-gram, entity, temporal, full-text (BM25) and vector indexes plus
//! a counting bloom filter. All of them hold doc-id strings only; the graph
//! and episode log own the objects.
//!
//! Doc ids are namespaced so the retriever can tell which store to
//! dereference: `mem:<uuid>` episode, `edge:<uuid>` fact, `node:<uuid>`
//! entity, `ctx:<user>:<char>:<id>` persistent condition,
//! `fsh:<user>:<char>:<id>` foreshadowing (reserved for the external
//! tracker). The prefix is load-bearing; nothing else encodes the origin.

mod bloom;
mod entity;
mod fulltext;
mod inverted;
mod ngram;
mod temporal;
mod vector;

pub use bloom::BloomFilter;
pub use entity::{EntityIndex, IndexedEntity};
pub use fulltext::{Bm25Config, FullTextIndex};
pub use inverted::InvertedIndex;
pub use ngram::NgramIndex;
pub use temporal::{TemporalEntry, TemporalIndex, TimeAxis, TimeRange, TimelineEventKind};
pub use vector::{cosine_similarity, FlatVectorIndex, IvfConfig, IvfVectorIndex, VectorStats};

// ============================================================================
// DOC ID NAMESPACE
// ============================================================================

/// Parsed document id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocId {
    /// An episode (raw turn), `mem:<uuid>`
    Memory(String),
    /// A temporal fact, `edge:<uuid>`
    Edge(String),
    /// An entity node, `node:<uuid>`
    Node(String),
    /// A persistent condition, `ctx:<user>:<char>:<id>`
    Condition(String),
    /// A foreshadowing record, `fsh:<user>:<char>:<id>` (external producer)
    Foreshadow(String),
}

impl DocId {
    pub fn memory(id: &str) -> String {
        format!("mem:{id}")
    }

    pub fn edge(id: &str) -> String {
        format!("edge:{id}")
    }

    pub fn node(id: &str) -> String {
        format!("node:{id}")
    }

    pub fn condition(user_id: &str, character_id: &str, id: &str) -> String {
        format!("ctx:{user_id}:{character_id}:{id}")
    }

    /// Parse a namespaced doc id; `None` for an unknown prefix
    pub fn parse(doc_id: &str) -> Option<DocId> {
        let (prefix, rest) = doc_id.split_once(':')?;
        match prefix {
            "mem" => Some(DocId::Memory(rest.to_string())),
            "edge" => Some(DocId::Edge(rest.to_string())),
            "node" => Some(DocId::Node(rest.to_string())),
            "ctx" => Some(DocId::Condition(rest.rsplit(':').next()?.to_string())),
            "fsh" => Some(DocId::Foreshadow(rest.rsplit(':').next()?.to_string())),
            _ => None,
        }
    }
}

// ============================================================================
// TOKENIZATION
// ============================================================================

/// True for CJK unified ideograph code points
pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

/// Case-folded tokens: whitespace/punctuation-delimited runs for Western
/// text, character unigrams for CJK.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                current.push(lower);
            }
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_roundtrip() {
        assert_eq!(
            DocId::parse(&DocId::memory("abc")),
            Some(DocId::Memory("abc".into()))
        );
        assert_eq!(
            DocId::parse(&DocId::edge("e1")),
            Some(DocId::Edge("e1".into()))
        );
        assert_eq!(
            DocId::parse(&DocId::condition("u", "c", "42")),
            Some(DocId::Condition("42".into()))
        );
        assert_eq!(DocId::parse("fsh:u:c:7"), Some(DocId::Foreshadow("7".into())));
        assert_eq!(DocId::parse("bogus:1"), None);
        assert_eq!(DocId::parse("noprefix"), None);
    }

    #[test]
    fn test_tokenize_mixed_scripts() {
        let tokens = tokenize("Alice lives in 北京 now!");
        assert_eq!(tokens, vec!["alice", "lives", "in", "北", "京", "now"]);
    }

    #[test]
    fn test_tokenize_case_folds() {
        assert_eq!(tokenize("Lucky Number 7749382"), vec!["lucky", "number", "7749382"]);
    }
}
