use std::collections::HashMap;
use std::time::{Duration, Instant};

use facegate_embed::Embedding;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::storage::IdentityStore;

/// Samples averaged into one committed identity.
pub const REQUIRED_SAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Partial { count: usize, remaining: usize },
    Complete { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEnrollment {
    pub name: String,
    pub count: usize,
}

struct Buffer {
    samples: Vec<Embedding>,
    started: Instant,
}

/// Collects samples per identity until [`REQUIRED_SAMPLES`] arrive, then
/// commits their mean to the store and drops the buffer.
///
/// Buffers live only in memory; a restart discards enrollments in progress.
pub struct EnrollmentAccumulator {
    max_age: Duration,
    buffers: Mutex<HashMap<String, Buffer>>,
}

impl EnrollmentAccumulator {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Buffer one sample for `name`, committing into `store` on the last one.
    ///
    /// The buffer lock is held across the commit, so two concurrent final
    /// samples cannot both commit. If the commit fails the sample is dropped
    /// and the earlier samples stay buffered. Zero-norm samples are refused,
    /// and samples whose mean has zero norm abandon the enrollment.
    pub fn add_sample(
        &self,
        store: &IdentityStore,
        name: &str,
        embedding: Embedding,
    ) -> Result<EnrollmentStatus> {
        embedding.ensure_usable()?;
        let mut buffers = self.buffers.lock();

        let expired = buffers
            .get(name)
            .is_some_and(|b| b.started.elapsed() > self.max_age);
        if expired {
            if let Some(stale) = buffers.remove(name) {
                info!(
                    "enrollment for '{}' expired with {} sample(s), restarting",
                    name,
                    stale.samples.len()
                );
            }
        }

        let count = buffers.get(name).map_or(0, |b| b.samples.len()) + 1;
        if count < REQUIRED_SAMPLES {
            buffers
                .entry(name.to_string())
                .or_insert_with(|| Buffer {
                    samples: Vec::with_capacity(REQUIRED_SAMPLES),
                    started: Instant::now(),
                })
                .samples
                .push(embedding);
            debug!("enrollment sample {} for '{}'", count, name);
            return Ok(EnrollmentStatus::Partial {
                count,
                remaining: REQUIRED_SAMPLES - count,
            });
        }

        let mut samples = buffers
            .get(name)
            .map(|b| b.samples.clone())
            .unwrap_or_default();
        samples.push(embedding);
        let mean = Embedding::mean(&samples)?;
        if let Err(e) = mean.ensure_usable() {
            buffers.remove(name);
            warn!("enrollment for '{}' averaged to a zero vector, discarded", name);
            return Err(e.into());
        }

        store.put(name, mean)?;
        buffers.remove(name);
        info!(
            "enrolled '{}' from {} samples into {} partition",
            name,
            REQUIRED_SAMPLES,
            store.partition()
        );
        Ok(EnrollmentStatus::Complete {
            name: name.to_string(),
        })
    }

    /// Number of buffered samples for `name`, if an enrollment is in progress.
    pub fn pending_count(&self, name: &str) -> Option<usize> {
        self.buffers.lock().get(name).map(|b| b.samples.len())
    }

    pub fn pending(&self) -> Vec<PendingEnrollment> {
        let mut pending: Vec<_> = self
            .buffers
            .lock()
            .iter()
            .map(|(name, b)| PendingEnrollment {
                name: name.clone(),
                count: b.samples.len(),
            })
            .collect();
        pending.sort_by(|a, b| a.name.cmp(&b.name));
        pending
    }

    /// Drop buffers older than the configured maximum age.
    pub fn prune_expired(&self) -> usize {
        let mut buffers = self.buffers.lock();
        let before = buffers.len();
        buffers.retain(|name, b| {
            let keep = b.started.elapsed() <= self.max_age;
            if !keep {
                info!("abandoning stale enrollment for '{}'", name);
            }
            keep
        });
        before - buffers.len()
    }
}
