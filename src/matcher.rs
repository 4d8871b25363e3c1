use facegate_embed::{cosine_similarity, Embedding, EmbeddingError};
use log::warn;
use serde::Serialize;

use crate::error::Result;
use crate::storage::IdentityStore;

pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Label reported for a rejected query.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Best-scoring identity for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Accepted { name: String, score: f32 },
    Rejected { score: f32 },
    EmptyStore,
}

impl MatchOutcome {
    pub fn label(&self) -> &str {
        match self {
            MatchOutcome::Accepted { name, .. } => name,
            _ => UNKNOWN_LABEL,
        }
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            MatchOutcome::Accepted { score, .. } | MatchOutcome::Rejected { score } => {
                Some(*score)
            }
            MatchOutcome::EmptyStore => None,
        }
    }
}

/// Score reported when a non-empty index has no comparable identity.
pub const NO_SIMILARITY: f32 = -1.0;

/// What a scan of an index found for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Nothing is enrolled.
    Empty,
    /// Identities exist, but none has a usable embedding.
    Unusable,
    Best(Candidate),
}

impl Lookup {
    pub fn candidate(self) -> Option<Candidate> {
        match self {
            Lookup::Best(c) => Some(c),
            _ => None,
        }
    }
}

/// Nearest-identity lookup over a set of enrolled embeddings.
pub trait IdentityIndex: Send + Sync {
    fn best_candidate(&self, query: &Embedding) -> Result<Lookup>;
}

/// Linear scan in name order; ties keep the first name.
impl IdentityIndex for IdentityStore {
    fn best_candidate(&self, query: &Embedding) -> Result<Lookup> {
        let query = query.normalize()?;
        self.with_records(|records| {
            if records.is_empty() {
                return Ok(Lookup::Empty);
            }
            let mut best: Option<Candidate> = None;
            for (name, embedding) in records {
                let score = match cosine_similarity(&query, embedding) {
                    Ok(score) => score,
                    Err(EmbeddingError::Degenerate) => {
                        warn!("skipping '{}' in {}: zero-norm embedding", name, self.partition());
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(Candidate {
                        name: name.clone(),
                        score,
                    });
                }
            }
            Ok(match best {
                Some(c) => Lookup::Best(c),
                None => {
                    warn!("{} partition holds no usable embeddings", self.partition());
                    Lookup::Unusable
                }
            })
        })
    }
}

/// Applies the acceptance threshold to the best candidate from an index.
#[derive(Debug, Clone, Copy)]
pub struct MatchingEngine {
    threshold: f32,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl MatchingEngine {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn match_query(&self, index: &dyn IdentityIndex, query: &Embedding) -> Result<MatchOutcome> {
        Ok(self.decide(index.best_candidate(query)?))
    }

    /// Strictly greater than the threshold is accepted; equal is rejected.
    pub fn decide(&self, lookup: Lookup) -> MatchOutcome {
        match lookup {
            Lookup::Empty => MatchOutcome::EmptyStore,
            Lookup::Unusable => MatchOutcome::Rejected {
                score: NO_SIMILARITY,
            },
            Lookup::Best(c) if c.score > self.threshold => MatchOutcome::Accepted {
                name: c.name,
                score: c.score,
            },
            Lookup::Best(c) => MatchOutcome::Rejected { score: c.score },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FacegateError;
    use crate::identity::Partition;
    use facegate_embed::EMBEDDING_DIM;

    fn vector(pairs: &[(usize, f32)]) -> Embedding {
        let mut v = vec![0.0; EMBEDDING_DIM];
        for &(i, x) in pairs {
            v[i] = x;
        }
        Embedding::from_vec(v).unwrap()
    }

    fn store() -> (tempfile::TempDir, IdentityStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path(), Partition::Server).unwrap();
        (dir, store)
    }

    #[test]
    fn test_empty_store() {
        let (_dir, store) = store();
        let outcome = MatchingEngine::default()
            .match_query(&store, &vector(&[(0, 1.0)]))
            .unwrap();
        assert_eq!(outcome, MatchOutcome::EmptyStore);
        assert_eq!(outcome.score(), None);
    }

    #[test]
    fn test_accepts_best_match() {
        let (_dir, store) = store();
        store.put("alice", vector(&[(0, 1.0)])).unwrap();
        store.put("bob", vector(&[(1, 1.0)])).unwrap();
        store.put("carol", vector(&[(0, 1.0), (1, 1.0)])).unwrap();

        let outcome = MatchingEngine::default()
            .match_query(&store, &vector(&[(1, 3.0), (0, 0.1)]))
            .unwrap();
        match outcome {
            MatchOutcome::Accepted { name, score } => {
                assert_eq!(name, "bob");
                assert!(score > 0.99);
            }
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_below_threshold() {
        let (_dir, store) = store();
        store.put("alice", vector(&[(0, 1.0)])).unwrap();
        let outcome = MatchingEngine::default()
            .match_query(&store, &vector(&[(1, 1.0)]))
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::Rejected { score } if score.abs() < 1e-6));
        assert_eq!(outcome.label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_threshold_is_strict() {
        let engine = MatchingEngine::new(0.6);
        let at = Candidate {
            name: "alice".into(),
            score: 0.6,
        };
        assert_eq!(engine.decide(Lookup::Best(at)), MatchOutcome::Rejected { score: 0.6 });

        let above = Candidate {
            name: "alice".into(),
            score: 0.60001,
        };
        assert!(matches!(
            engine.decide(Lookup::Best(above)),
            MatchOutcome::Accepted { .. }
        ));
    }

    #[test]
    fn test_threshold_boundary_through_store() {
        let (_dir, store) = store();
        store.put("alice", vector(&[(0, 3.0), (1, 4.0)])).unwrap();
        let query = vector(&[(0, 1.0)]);
        let score = store.best_candidate(&query).unwrap().candidate().unwrap().score;

        let at = MatchingEngine::new(score).match_query(&store, &query).unwrap();
        assert!(matches!(at, MatchOutcome::Rejected { .. }));

        let below = MatchingEngine::new(score - 1e-5)
            .match_query(&store, &query)
            .unwrap();
        assert!(matches!(below, MatchOutcome::Accepted { .. }));
    }

    #[test]
    fn test_ties_pick_first_name() {
        let (_dir, store) = store();
        store.put("zed", vector(&[(0, 1.0)])).unwrap();
        store.put("amy", vector(&[(0, 2.0)])).unwrap();
        store.put("mia", vector(&[(0, 5.0)])).unwrap();

        for _ in 0..5 {
            let best = store.best_candidate(&vector(&[(0, 1.0)])).unwrap();
            assert_eq!(best.candidate().unwrap().name, "amy");
        }
    }

    #[test]
    fn test_degenerate_query_rejected() {
        let (_dir, store) = store();
        store.put("alice", vector(&[(0, 1.0)])).unwrap();
        let err = MatchingEngine::default()
            .match_query(&store, &vector(&[]))
            .unwrap_err();
        assert!(matches!(err, FacegateError::DegenerateVector));
    }

    /// Zero-norm records can only come from snapshots written before
    /// `put` rejected them.
    fn store_with(records: &[(&str, Embedding)]) -> (tempfile::TempDir, IdentityStore) {
        let dir = tempfile::tempdir().unwrap();
        let map: std::collections::BTreeMap<_, _> = records
            .iter()
            .map(|(name, e)| (name.to_string(), e.clone()))
            .collect();
        crate::storage::write_snapshot(&dir.path().join(Partition::Server.snapshot_file()), &map)
            .unwrap();
        let store = IdentityStore::open(dir.path(), Partition::Server).unwrap();
        (dir, store)
    }

    #[test]
    fn test_degenerate_candidate_skipped() {
        let (_dir, store) = store_with(&[("blank", vector(&[])), ("alice", vector(&[(0, 1.0)]))]);
        let best = store.best_candidate(&vector(&[(0, 1.0)])).unwrap();
        assert_eq!(best.candidate().unwrap().name, "alice");
    }

    #[test]
    fn test_only_degenerate_records_is_rejected_not_empty() {
        let (_dir, store) = store_with(&[("blank", vector(&[]))]);
        assert_eq!(store.len(), 1);
        let outcome = MatchingEngine::default()
            .match_query(&store, &vector(&[(0, 1.0)]))
            .unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Rejected {
                score: NO_SIMILARITY
            }
        );
        assert_eq!(outcome.label(), UNKNOWN_LABEL);
    }
}
