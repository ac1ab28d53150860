//! Recall fusion
//!
//! Reciprocal Rank Fusion merges per-arm result lists without normalizing
//! their score scales: `score(d) = sum of w_i / (k + rank_i(d))`. A weighted
//! score fusion with a multi-arm hit bonus is kept as the alternative for
//! callers that trust the raw scores.

use std::collections::HashMap;

/// Weighted RRF over any number of ranked arms.
///
/// Ranks start at 1; `weights` defaults to 1.0 per arm. Result is sorted by
/// fused score descending, ties broken by doc id for determinism.
pub fn reciprocal_rank_fusion(
    results_list: &[Vec<(String, f32)>],
    k: f32,
    weights: Option<&[f32]>,
) -> Vec<(String, f32)> {
    if results_list.is_empty() {
        return Vec::new();
    }

    let mut scores: HashMap<String, f32> = HashMap::new();
    for (arm, results) in results_list.iter().enumerate() {
        let weight = weights.and_then(|w| w.get(arm)).copied().unwrap_or(1.0);
        for (rank, (doc_id, _)) in results.iter().enumerate() {
            *scores.entry(doc_id.clone()).or_default() +=
                weight * (1.0 / (k + (rank + 1) as f32));
        }
    }

    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Weighted score fusion with min-max normalization per arm and a 10% bonus
/// per extra arm a document appears in.
pub fn weighted_score_fusion(
    results_list: &[Vec<(String, f32)>],
    weights: Option<&[f32]>,
) -> Vec<(String, f32)> {
    if results_list.is_empty() {
        return Vec::new();
    }

    let mut fused: HashMap<String, f32> = HashMap::new();
    let mut arm_hits: HashMap<String, u32> = HashMap::new();

    for (arm, results) in results_list.iter().enumerate() {
        if results.is_empty() {
            continue;
        }
        let weight = weights.and_then(|w| w.get(arm)).copied().unwrap_or(1.0);

        let min = results.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
        let max = results.iter().map(|(_, s)| *s).fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;

        for (doc_id, score) in results {
            // Uniform-score arms normalize to 1.0, not 0.0
            let normalized = if range > 0.0 { (score - min) / range } else { 1.0 };
            *fused.entry(doc_id.clone()).or_default() += weight * normalized;
            *arm_hits.entry(doc_id.clone()).or_default() += 1;
        }
    }

    for (doc_id, hits) in &arm_hits {
        if *hits > 1 {
            if let Some(score) = fused.get_mut(doc_id) {
                *score *= 1.0 + 0.1 * (*hits - 1) as f32;
            }
        }
    }

    let mut results: Vec<(String, f32)> = fused.into_iter().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn arm(pairs: &[(&str, f32)]) -> Vec<(String, f32)> {
        pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    #[test]
    fn test_rrf_rewards_multi_arm_hits() {
        let keyword = arm(&[("doc-1", 0.9), ("doc-2", 0.8), ("doc-3", 0.7)]);
        let vector = arm(&[("doc-2", 0.95), ("doc-1", 0.85), ("doc-4", 0.75)]);

        let fused = reciprocal_rank_fusion(&[keyword, vector], 60.0, None);

        // doc-1 and doc-2 appear in both arms and outrank the singles
        let top2: Vec<&str> = fused.iter().take(2).map(|(id, _)| id.as_str()).collect();
        assert!(top2.contains(&"doc-1"));
        assert!(top2.contains(&"doc-2"));
        for window in fused.windows(2) {
            assert!(window[0].1 >= window[1].1);
        }
    }

    #[test]
    fn test_rrf_weights_bias_arms() {
        let arm_a = arm(&[("doc-a", 1.0)]);
        let arm_b = arm(&[("doc-b", 1.0)]);

        let fused = reciprocal_rank_fusion(&[arm_a, arm_b], 60.0, Some(&[2.0, 1.0]));
        assert_eq!(fused[0].0, "doc-a");
        assert!(fused[0].1 > fused[1].1);
    }

    #[test]
    fn test_rrf_empty_inputs() {
        assert!(reciprocal_rank_fusion(&[], 60.0, None).is_empty());
        let fused = reciprocal_rank_fusion(&[vec![], arm(&[("doc-1", 0.5)])], 60.0, None);
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn test_rrf_deterministic_tie_break() {
        let arm_a = arm(&[("doc-b", 1.0)]);
        let arm_b = arm(&[("doc-a", 1.0)]);
        let fused = reciprocal_rank_fusion(&[arm_a, arm_b], 60.0, None);
        assert_eq!(fused[0].0, "doc-a");
    }

    #[test]
    fn test_weighted_fusion_normalizes_and_bonuses() {
        let arm_a = arm(&[("doc-1", 10.0), ("doc-2", 5.0)]);
        let arm_b = arm(&[("doc-2", 0.9)]);

        let fused = weighted_score_fusion(&[arm_a, arm_b], None);
        // doc-2: 0.0 (min of arm A) + 1.0 (uniform arm B) with the 10% bonus
        let doc2 = fused.iter().find(|(id, _)| id == "doc-2").unwrap();
        assert!((doc2.1 - 1.1).abs() < 1e-5);
    }
}
