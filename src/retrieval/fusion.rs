//! Weighted reciprocal-rank fusion of dense and sparse result lists.

use super::RetrievedChunk;
use std::cmp::Ordering;
use std::collections::HashMap;

const RRF_K: f32 = 60.0;

/// Relative weight of each result list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    /// Weight applied to dense ranks.
    pub dense: f32,
    /// Weight applied to sparse ranks.
    pub sparse: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            dense: 1.0,
            sparse: 1.0,
        }
    }
}

/// Merge two ranked lists into the top `k` chunks.
///
/// Each chunk scores `weight / (60 + rank)` per list it appears in (rank starts at 1). Equal fused
/// scores are ordered by dense similarity (absent counts as lowest), then by id, so the output is
/// deterministic.
pub fn fuse(
    dense: Vec<RetrievedChunk>,
    sparse: Vec<RetrievedChunk>,
    k: usize,
    weights: FusionWeights,
) -> Vec<RetrievedChunk> {
    let mut merged: HashMap<String, RetrievedChunk> = HashMap::new();

    for (rank, chunk) in dense.into_iter().enumerate() {
        let contribution = weights.dense / (RRF_K + rank as f32 + 1.0);
        let dense_score = chunk.dense_score.or(Some(chunk.score));
        let entry = merged.entry(chunk.id.clone()).or_insert_with(|| RetrievedChunk {
            score: 0.0,
            dense_score: None,
            sparse_score: None,
            ..chunk
        });
        if entry.dense_score.is_none() {
            entry.dense_score = dense_score;
            entry.score += contribution;
        }
    }

    for (rank, chunk) in sparse.into_iter().enumerate() {
        let contribution = weights.sparse / (RRF_K + rank as f32 + 1.0);
        let sparse_score = chunk.sparse_score.or(Some(chunk.score));
        let entry = merged.entry(chunk.id.clone()).or_insert_with(|| RetrievedChunk {
            score: 0.0,
            dense_score: None,
            sparse_score: None,
            ..chunk
        });
        if entry.sparse_score.is_none() {
            entry.sparse_score = sparse_score;
            entry.score += contribution;
        }
    }

    let mut fused: Vec<RetrievedChunk> = merged.into_values().collect();
    fused.sort_by(compare_fused);
    fused.truncate(k);
    fused
}

fn compare_fused(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let a_dense = a.dense_score.unwrap_or(f32::NEG_INFINITY);
            let b_dense = b.dense_score.unwrap_or(f32::NEG_INFINITY);
            b_dense.partial_cmp(&a_dense).unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            id: id.into(),
            text: format!("text {id}"),
            source: Some("doc.pdf".into()),
            score,
            dense_score: None,
            sparse_score: None,
        }
    }

    fn ids(chunks: &[RetrievedChunk]) -> Vec<&str> {
        chunks.iter().map(|chunk| chunk.id.as_str()).collect()
    }

    #[test]
    fn chunks_found_by_both_indexes_rank_first() {
        let fused = fuse(
            vec![hit("a", 0.9), hit("b", 0.8)],
            vec![hit("c", 7.0), hit("b", 5.0)],
            3,
            FusionWeights::default(),
        );
        assert_eq!(ids(&fused), vec!["b", "a", "c"]);
        let b = &fused[0];
        assert_eq!(b.dense_score, Some(0.8));
        assert_eq!(b.sparse_score, Some(5.0));
    }

    #[test]
    fn ties_prefer_dense_hits() {
        // Rank one in each list only: equal fused scores.
        let fused = fuse(
            vec![hit("z", 0.4)],
            vec![hit("a", 9.0)],
            2,
            FusionWeights::default(),
        );
        assert_eq!(ids(&fused), vec!["z", "a"]);
    }

    #[test]
    fn remaining_ties_break_on_id() {
        let fused = fuse(
            Vec::new(),
            vec![hit("b", 1.0)],
            5,
            FusionWeights::default(),
        );
        let again = fuse(
            vec![hit("b", 0.5), hit("a", 0.5)],
            Vec::new(),
            5,
            FusionWeights {
                dense: 0.0,
                sparse: 1.0,
            },
        );
        assert_eq!(ids(&fused), vec!["b"]);
        assert_eq!(ids(&again), vec!["a", "b"]);
    }

    #[test]
    fn weights_shift_the_order() {
        let fused = fuse(
            vec![hit("dense-only", 0.9)],
            vec![hit("sparse-only", 3.0)],
            2,
            FusionWeights {
                dense: 0.2,
                sparse: 0.8,
            },
        );
        assert_eq!(ids(&fused), vec!["sparse-only", "dense-only"]);
    }

    #[test]
    fn truncates_to_k_and_ignores_duplicates_within_a_list() {
        let fused = fuse(
            vec![hit("a", 0.9), hit("a", 0.1), hit("b", 0.5)],
            Vec::new(),
            1,
            FusionWeights::default(),
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[0].dense_score, Some(0.9));
    }
}
