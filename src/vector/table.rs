//! In-memory vector table backing a vector index.

use std::cmp::Ordering;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::{LyraError, Result};
use crate::util::simd::numeric;
use crate::vector::SimilarityHit;
use crate::vector::similarity::normalize;

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    vector: Arc<[f32]>,
}

#[derive(Debug, Default)]
struct TableState {
    entries: AHashMap<String, Entry>,
    next_seq: u64,
    dimension: Option<usize>,
}

/// Mapping from document identifier to a unit-length vector.
///
/// Vectors are normalised on the way in so that search reduces to a dot
/// product. Each identifier keeps the sequence number of its first insertion,
/// which breaks ties between equal scores.
#[derive(Debug, Default)]
pub struct VectorTable {
    state: RwLock<TableState>,
}

impl VectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the vector stored for `id`.
    pub fn upsert(&self, id: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(LyraError::encoding(format!("empty vector for '{id}'")));
        }
        ensure_finite(vector, || format!("vector for '{id}'"))?;
        let normalized: Arc<[f32]> = normalize(vector).into();

        let mut state = self.state.write();
        match state.dimension {
            Some(dim) if dim != vector.len() => {
                return Err(LyraError::encoding(format!(
                    "vector for '{id}' has dimension {}, index expects {dim}",
                    vector.len()
                )));
            }
            Some(_) => {}
            None => state.dimension = Some(vector.len()),
        }

        if let Some(entry) = state.entries.get_mut(id) {
            entry.vector = normalized;
        } else {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert(
                id.to_string(),
                Entry {
                    seq,
                    vector: normalized,
                },
            );
        }
        Ok(())
    }

    /// Remove `id`, returning whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.state.write().entries.remove(id).is_some()
    }

    /// Up to `n` identifiers ranked by cosine similarity to `query`.
    pub fn search(&self, query: &[f32], n: usize) -> Result<Vec<SimilarityHit>> {
        let state = self.state.read();
        let query = Self::prepare_query(&state, query)?;

        let mut scored: Vec<(u64, SimilarityHit)> = state
            .entries
            .iter()
            .map(|(id, entry)| {
                (
                    entry.seq,
                    SimilarityHit {
                        id: id.clone(),
                        score: numeric::dot(&query, &entry.vector),
                    },
                )
            })
            .collect();
        drop(state);

        scored.sort_by(|(seq_a, a), (seq_b, b)| {
            by_score_desc(a.score, b.score).then(seq_a.cmp(seq_b))
        });
        scored.truncate(n);
        Ok(scored.into_iter().map(|(_, hit)| hit).collect())
    }

    /// Rank `candidates` by similarity to `query`, keeping at most `n`.
    ///
    /// Candidates without a stored vector are dropped. Equal scores keep the
    /// order in which candidates were given.
    pub fn rank(&self, query: &[f32], candidates: &[String], n: usize) -> Result<Vec<SimilarityHit>> {
        let state = self.state.read();
        let query = Self::prepare_query(&state, query)?;

        let mut hits: Vec<SimilarityHit> = candidates
            .iter()
            .filter_map(|id| {
                state.entries.get(id).map(|entry| SimilarityHit {
                    id: id.clone(),
                    score: numeric::dot(&query, &entry.vector),
                })
            })
            .collect();
        drop(state);

        hits.sort_by(|a, b| by_score_desc(a.score, b.score));
        hits.truncate(n);
        Ok(hits)
    }

    fn prepare_query(state: &TableState, query: &[f32]) -> Result<Vec<f32>> {
        if let Some(dim) = state.dimension
            && dim != query.len()
        {
            return Err(LyraError::encoding(format!(
                "query vector has dimension {}, index expects {dim}",
                query.len()
            )));
        }
        ensure_finite(query, || "query vector".to_string())?;
        Ok(normalize(query))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().entries.contains_key(id)
    }

    /// The stored (normalised) vector for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<[f32]>> {
        self.state.read().entries.get(id).map(|e| e.vector.clone())
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality fixed by the first upsert.
    pub fn dimension(&self) -> Option<usize> {
        self.state.read().dimension
    }

    /// Drop every entry and forget the dimension.
    pub fn clear(&self) {
        *self.state.write() = TableState::default();
    }
}

fn ensure_finite(vector: &[f32], what: impl FnOnce() -> String) -> Result<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(pos) => Err(LyraError::encoding(format!(
            "{} has a non-finite component at {pos}",
            what()
        ))),
        None => Ok(()),
    }
}

/// Descending score order. Scores are finite; -0.0 and 0.0 tie.
fn by_score_desc(a: f32, b: f32) -> Ordering {
    (b + 0.0).total_cmp(&(a + 0.0))
}
