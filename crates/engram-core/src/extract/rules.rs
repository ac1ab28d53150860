//! Rule-based extraction
//!
//! Pure-local, zero cost: fixed-phrase scanners over sentence splits. The
//! patterns are deliberately narrow; ADAPTIVE mode escalates to the LLM when
//! nothing fires.

use chrono::{DateTime, TimeZone, Utc};

use crate::index::tokenize;

use super::{ExtractedEntity, ExtractedRelation};

/// First-person sentences are attributed to this subject
pub const SELF_SUBJECT: &str = "user";

// ============================================================================
// ENTITIES
// ============================================================================

/// Words that start sentences without naming anything
const NON_ENTITY_WORDS: &[&str] = &[
    "i", "the", "a", "an", "my", "by", "so", "but", "and", "or", "if", "on", "in", "at", "to",
    "it", "he", "she", "we", "they", "you", "this", "that", "there", "hello", "hi", "yes", "no",
    "ok", "okay", "well", "now", "then", "also", "please",
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\'' || c == '-'
}

/// Capitalized word runs, quoted spans, and long digit runs
pub fn extract_entities(text: &str) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();
    let mut seen = std::collections::HashSet::new();

    // Capitalized runs: "Alice", "New York City"
    let words: Vec<(usize, &str)> = split_words(text);
    let mut i = 0;
    while i < words.len() {
        let (start, word) = words[i];
        let capitalized = word.chars().next().is_some_and(|c| c.is_uppercase())
            && word.chars().any(|c| c.is_lowercase());
        if capitalized && !NON_ENTITY_WORDS.contains(&word.to_lowercase().as_str()) {
            let mut j = i + 1;
            let mut end = start + word.len();
            while j < words.len() {
                let (next_start, next_word) = words[j];
                let adjacent = text[end..next_start].chars().all(|c| c == ' ');
                let next_cap = next_word.chars().next().is_some_and(|c| c.is_uppercase());
                if adjacent && next_cap {
                    end = next_start + next_word.len();
                    j += 1;
                } else {
                    break;
                }
            }
            let name = &text[start..end];
            if seen.insert(name.to_lowercase()) {
                entities.push(ExtractedEntity {
                    name: name.to_string(),
                    entity_type: "ENTITY".to_string(),
                    span: (start, end),
                });
            }
            i = j;
        } else {
            i += 1;
        }
    }

    // Quoted spans: "the red keep"
    let mut search_from = 0;
    while let Some(open) = text[search_from..].find('"') {
        let open = search_from + open;
        let Some(close_rel) = text[open + 1..].find('"') else {
            break;
        };
        let close = open + 1 + close_rel;
        let inner = text[open + 1..close].trim();
        if !inner.is_empty() && inner.len() <= 60 && seen.insert(inner.to_lowercase()) {
            entities.push(ExtractedEntity {
                name: inner.to_string(),
                entity_type: "QUOTE".to_string(),
                span: (open + 1, close),
            });
        }
        search_from = close + 1;
    }

    // Digit runs of 3+ (identifiers, lucky numbers)
    for (start, word) in &words {
        if word.len() >= 3 && word.chars().all(|c| c.is_ascii_digit()) && seen.insert(word.to_string())
        {
            entities.push(ExtractedEntity {
                name: word.to_string(),
                entity_type: "NUMBER".to_string(),
                span: (*start, start + word.len()),
            });
        }
    }

    entities
}

fn split_words(text: &str) -> Vec<(usize, &str)> {
    let mut words = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if is_word_char(c) {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            words.push((s, &text[s..i]));
        }
    }
    if let Some(s) = start {
        words.push((s, &text[s..]));
    }
    words
}

// ============================================================================
// RELATIONS
// ============================================================================

struct Pattern {
    verbs: &'static [&'static str],
    /// Preposition that introduces the object, if any
    preposition: Option<&'static str>,
    predicate: &'static str,
    object_type: &'static str,
}

const PATTERNS: &[Pattern] = &[
    Pattern {
        verbs: &["live", "lives", "lived", "living"],
        preposition: Some("in"),
        predicate: "LIVES_IN",
        object_type: "LOCATION",
    },
    Pattern {
        verbs: &["work", "works", "worked", "working"],
        preposition: Some("at"),
        predicate: "WORKED_AT",
        object_type: "ORGANIZATION",
    },
    Pattern {
        verbs: &["work", "works", "worked", "working"],
        preposition: Some("for"),
        predicate: "WORKED_AT",
        object_type: "ORGANIZATION",
    },
    Pattern {
        verbs: &["moved"],
        preposition: Some("to"),
        predicate: "MOVED_TO",
        object_type: "LOCATION",
    },
    Pattern {
        verbs: &["loves", "love"],
        preposition: None,
        predicate: "LOVES",
        object_type: "ENTITY",
    },
    Pattern {
        verbs: &["hates", "hate"],
        preposition: None,
        predicate: "HATES",
        object_type: "ENTITY",
    },
    Pattern {
        verbs: &["married"],
        preposition: None,
        predicate: "MARRIED_TO",
        object_type: "ENTITY",
    },
    Pattern {
        verbs: &["owns", "own"],
        preposition: None,
        predicate: "OWNS",
        object_type: "ENTITY",
    },
];

/// Words that terminate an object span
const OBJECT_STOPS: &[&str] = &[
    "from", "since", "until", "because", "and", "but", "when", "while", "where", "after",
    "before", "now", "then",
];

/// Sentence-level subject-verb-object matching with date-range capture
pub fn extract_relations(text: &str) -> Vec<ExtractedRelation> {
    let mut relations = Vec::new();

    for sentence in split_sentences(text) {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        if words.len() < 2 {
            continue;
        }

        for pattern in PATTERNS {
            let Some(verb_idx) = words
                .iter()
                .position(|w| pattern.verbs.contains(&clean(w).to_lowercase().as_str()))
            else {
                continue;
            };

            let Some(subject) = subject_of(&words[..verb_idx]) else {
                continue;
            };

            // Object starts after the verb, or after the required preposition
            let mut object_start = verb_idx + 1;
            if let Some(preposition) = pattern.preposition {
                if words.get(object_start).map(|w| clean(w).to_lowercase())
                    != Some(preposition.to_string())
                {
                    continue;
                }
                object_start += 1;
            }

            let object_words: Vec<&str> = words[object_start..]
                .iter()
                .take_while(|w| !OBJECT_STOPS.contains(&clean(w).to_lowercase().as_str()))
                .copied()
                .collect();
            let object = object_words
                .iter()
                .map(|w| clean(w))
                .collect::<Vec<_>>()
                .join(" ");
            if object.is_empty() || object.len() > 60 {
                continue;
            }

            let (valid_from, valid_until) = extract_year_range(&words[object_start..]);

            relations.push(ExtractedRelation {
                subject: subject.clone(),
                predicate: pattern.predicate.to_string(),
                object: object.clone(),
                object_type: pattern.object_type.to_string(),
                fact: sentence.trim().to_string(),
                confidence: 0.5,
                valid_from,
                valid_until,
            });
            break;
        }
    }

    relations
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?', '\n', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn clean(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Subject from the tokens before the verb: "I" (and "my ...") map to the
/// self subject; otherwise a trailing capitalized run.
fn subject_of(before_verb: &[&str]) -> Option<String> {
    if before_verb.is_empty() {
        return None;
    }
    let cleaned: Vec<&str> = before_verb.iter().map(|w| clean(w)).collect();
    if cleaned.iter().any(|w| w.eq_ignore_ascii_case("i")) {
        return Some(SELF_SUBJECT.to_string());
    }
    // Trailing capitalized run right before the verb: "... Alice loves"
    let mut run: Vec<&str> = Vec::new();
    for word in cleaned.iter().rev() {
        if word.chars().next().is_some_and(|c| c.is_uppercase()) {
            run.push(word);
        } else {
            break;
        }
    }
    if run.is_empty() {
        return None;
    }
    run.reverse();
    Some(run.join(" "))
}

/// Capture "from 2018 to 2020" year ranges after the object
fn extract_year_range(words: &[&str]) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut from_year = None;
    let mut to_year = None;
    let mut i = 0;
    while i < words.len() {
        let word = clean(words[i]).to_lowercase();
        if (word == "from" || word == "since") && i + 1 < words.len() {
            from_year = parse_year(clean(words[i + 1]));
        }
        if (word == "to" || word == "until") && i + 1 < words.len() {
            to_year = parse_year(clean(words[i + 1]));
        }
        i += 1;
    }
    (
        from_year.map(|y| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap()),
        to_year.map(|y| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap()),
    )
}

fn parse_year(word: &str) -> Option<i32> {
    if word.len() == 4 && word.chars().all(|c| c.is_ascii_digit()) {
        word.parse().ok()
    } else {
        None
    }
}

// ============================================================================
// KEYWORDS
// ============================================================================

const KEYWORD_STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "i", "you", "he", "she", "it", "we", "they",
    "my", "your", "his", "her", "its", "our", "their", "and", "or", "but", "if", "then", "in",
    "on", "at", "to", "of", "for", "from", "with", "by", "about", "as", "be", "been", "do",
    "does", "did", "have", "has", "had", "not", "no", "so", "that", "this", "what", "where",
    "when", "who", "how", "why",
];

/// Query / document keywords: the token stream minus stopwords and single
/// Latin letters (CJK unigrams stay, they carry meaning alone)
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| {
            let is_cjk_token = t.chars().next().is_some_and(crate::index::is_cjk);
            (is_cjk_token || t.chars().count() > 1)
                && !KEYWORD_STOPWORDS.contains(&t.as_str())
        })
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalized_entity_extraction() {
        let entities = extract_entities("I live in Berlin with Alice Smith.");
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Berlin"));
        assert!(names.contains(&"Alice Smith"));
    }

    #[test]
    fn test_number_entity() {
        let entities = extract_entities("My lucky number is 7749382.");
        assert!(entities.iter().any(|e| e.name == "7749382" && e.entity_type == "NUMBER"));
    }

    #[test]
    fn test_quoted_entity() {
        let entities = extract_entities("They call it \"the red keep\" around here.");
        assert!(entities.iter().any(|e| e.name == "the red keep"));
    }

    #[test]
    fn test_first_person_relation() {
        let relations = extract_relations("I live in Berlin.");
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].subject, SELF_SUBJECT);
        assert_eq!(relations[0].predicate, "LIVES_IN");
        assert_eq!(relations[0].object, "Berlin");
    }

    #[test]
    fn test_third_person_relation() {
        let relations = extract_relations("Alice loves Bob.");
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].subject, "Alice");
        assert_eq!(relations[0].predicate, "LOVES");
        assert_eq!(relations[0].object, "Bob");
    }

    #[test]
    fn test_year_range_capture() {
        let relations = extract_relations("I worked at Acme from 2018 to 2020.");
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].predicate, "WORKED_AT");
        assert_eq!(relations[0].object, "Acme");
        let from = relations[0].valid_from.unwrap();
        let until = relations[0].valid_until.unwrap();
        assert_eq!(from.format("%Y").to_string(), "2018");
        assert_eq!(until.format("%Y").to_string(), "2020");
    }

    #[test]
    fn test_no_relation_in_plain_text() {
        assert!(extract_relations("What a lovely day").is_empty());
    }

    #[test]
    fn test_keywords_drop_stopwords() {
        let keywords = extract_keywords("Where does the user live in Berlin");
        assert!(keywords.contains(&"berlin".to_string()));
        assert!(keywords.contains(&"live".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"where".to_string()));
    }

    #[test]
    fn test_keywords_keep_cjk_unigrams() {
        let keywords = extract_keywords("住在北京");
        assert!(keywords.contains(&"北".to_string()));
    }
}
