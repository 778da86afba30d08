//! Similarity scoring and top-K selection.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How query and document vectors are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    /// Inner product
    #[default]
    Dot,
    /// Inner product of the normalised vectors
    Cosine,
}

impl Similarity {
    pub fn score(&self, query: &[f32], document: &[f32]) -> f32 {
        let dot = dot(query, document);
        match self {
            Similarity::Dot => dot,
            Similarity::Cosine => {
                let norms = norm(query) * norm(document);
                if norms == 0.0 {
                    0.0
                } else {
                    dot / norms
                }
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RankError {
    #[error("document {index} has {actual} dimensions, query has {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Position of a document in the ranked input, with its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedDocument {
    pub index: usize,
    pub score: f32,
}

/// Descending by score; NaN sorts last.
fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Return the `k` best documents in descending score order.
///
/// Documents with equal scores keep their input order.
pub fn rank(
    query: &[f32],
    documents: &[Vec<f32>],
    k: usize,
    similarity: Similarity,
) -> Result<Vec<RankedDocument>, RankError> {
    if k == 0 || documents.is_empty() {
        return Ok(Vec::new());
    }

    let mut scored = Vec::with_capacity(documents.len());
    for (index, document) in documents.iter().enumerate() {
        if document.len() != query.len() {
            return Err(RankError::DimensionMismatch {
                index,
                expected: query.len(),
                actual: document.len(),
            });
        }
        scored.push(RankedDocument {
            index,
            score: similarity.score(query, document),
        });
    }

    // `sort_by` is stable, which gives the tie-break.
    scored.sort_by(|a, b| descending(a.score, b.score));
    scored.truncate(k);
    Ok(scored)
}

/// [`rank`] over `(path, vector)` pairs, returning `(path, score)`.
pub fn rank_paths(
    query: &[f32],
    documents: &[(String, Vec<f32>)],
    k: usize,
    similarity: Similarity,
) -> Result<Vec<(String, f32)>, RankError> {
    let vectors: Vec<Vec<f32>> = documents.iter().map(|(_, v)| v.clone()).collect();
    Ok(rank(query, &vectors, k, similarity)?
        .into_iter()
        .map(|r| (documents[r.index].0.clone(), r.score))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![2.0, 0.0],
            vec![0.5, 0.5],
        ]
    }

    #[test]
    fn test_similarity_default_is_dot() {
        assert_eq!(Similarity::default(), Similarity::Dot);
        assert!((Similarity::Dot.score(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let a = Similarity::Cosine.score(&[1.0, 0.0], &[2.0, 0.0]);
        let b = Similarity::Cosine.score(&[1.0, 0.0], &[9.0, 0.0]);
        assert!((a - 1.0).abs() < 1e-6);
        assert!((a - b).abs() < 1e-6);
        assert_eq!(Similarity::Cosine.score(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_rank_descending() {
        let ranked = rank(&[1.0, 0.0], &docs(), 3, Similarity::Dot).unwrap();
        let order: Vec<usize> = ranked.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![2, 0, 3]);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_rank_cosine_changes_order() {
        let ranked = rank(&[1.0, 0.0], &docs(), 2, Similarity::Cosine).unwrap();
        // docs 0 and 2 both score 1.0 under cosine; input order wins.
        let order: Vec<usize> = ranked.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let documents = vec![vec![1.0], vec![3.0], vec![1.0], vec![3.0], vec![1.0]];
        let ranked = rank(&[1.0], &documents, 5, Similarity::Dot).unwrap();
        let order: Vec<usize> = ranked.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![1, 3, 0, 2, 4]);
    }

    #[test]
    fn test_k_bounds() {
        assert!(rank(&[1.0, 0.0], &docs(), 0, Similarity::Dot).unwrap().is_empty());
        assert_eq!(rank(&[1.0, 0.0], &docs(), 100, Similarity::Dot).unwrap().len(), 4);
        assert!(rank(&[1.0, 0.0], &[], 3, Similarity::Dot).unwrap().is_empty());
    }

    #[test]
    fn test_len_is_min_of_k_and_n() {
        let documents = docs();
        for k in 0..7 {
            let ranked = rank(&[0.3, 0.7], &documents, k, Similarity::Dot).unwrap();
            assert_eq!(ranked.len(), k.min(documents.len()));
        }
    }

    #[test]
    fn test_nan_sorts_last() {
        let documents = vec![vec![f32::NAN], vec![-5.0], vec![2.0]];
        let ranked = rank(&[1.0], &documents, 3, Similarity::Dot).unwrap();
        let order: Vec<usize> = ranked.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let documents = vec![vec![1.0, 0.0], vec![1.0]];
        let err = rank(&[1.0, 0.0], &documents, 2, Similarity::Dot).unwrap_err();
        assert_eq!(
            err,
            RankError::DimensionMismatch {
                index: 1,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_rank_paths() {
        let documents = vec![
            ("a.py".to_string(), vec![1.0, 0.0]),
            ("b.md".to_string(), vec![0.0, 1.0]),
            ("c.py".to_string(), vec![0.8, 0.1]),
        ];
        let ranked = rank_paths(&[1.0, 0.0], &documents, 2, Similarity::Dot).unwrap();
        let paths: Vec<&str> = ranked.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "c.py"]);
    }

    #[test]
    fn test_rank_does_not_mutate_inputs() {
        let documents = docs();
        let before = documents.clone();
        let _ = rank(&[1.0, 0.0], &documents, 2, Similarity::Dot).unwrap();
        assert_eq!(documents, before);
    }
}
