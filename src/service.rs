use std::collections::BTreeMap;
use std::time::Duration;

use facegate_embed::Embedding;
use log::info;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditLog, NewResult, ResultStatus};
use crate::config::Config;
use crate::device::DeviceClient;
use crate::enroll::{EnrollmentAccumulator, EnrollmentStatus, PendingEnrollment};
use crate::error::{FacegateError, Result};
use crate::identity::Partition;
use crate::matcher::{MatchOutcome, MatchingEngine};
use crate::relay::RelayHub;
use crate::storage::{IdentityStore, IdentityStores};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Enroll,
    Recognize,
}

/// An embedding submitted for enrollment or recognition.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubmissionOutcome {
    Enrollment(EnrollmentStatus),
    Match(MatchOutcome),
}

/// Everything a request handler needs, built once at startup.
pub struct AccessService {
    stores: IdentityStores,
    enrollment: EnrollmentAccumulator,
    matcher: MatchingEngine,
    audit: AuditLog,
    device: DeviceClient,
    relay: RelayHub,
}

impl AccessService {
    pub fn open(cfg: &Config) -> Result<Self> {
        let stores = IdentityStores::open(&cfg.data_dir)?;
        let audit = match cfg.audit_path() {
            Some(path) => AuditLog::open(&path)?,
            None => AuditLog::in_memory(),
        };
        info!(
            "service ready: threshold {:.3}, data dir {}",
            cfg.threshold,
            cfg.data_dir.display()
        );
        Ok(Self {
            stores,
            enrollment: EnrollmentAccumulator::new(cfg.enrollment_ttl()),
            matcher: MatchingEngine::new(cfg.threshold),
            audit,
            device: DeviceClient::new(cfg.device_url.clone(), cfg.device_timeout())?,
            relay: RelayHub::new(cfg.relay_queue, cfg.relay_send_timeout()),
        })
    }

    pub fn store(&self, partition: Partition) -> &IdentityStore {
        self.stores.get(partition)
    }

    pub fn enrollment(&self) -> &EnrollmentAccumulator {
        &self.enrollment
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn device(&self) -> &DeviceClient {
        &self.device
    }

    pub fn relay(&self) -> &RelayHub {
        &self.relay
    }

    pub fn submit(
        &self,
        mode: Mode,
        partition: Partition,
        submission: Submission,
    ) -> Result<SubmissionOutcome> {
        let embedding = Embedding::from_vec(submission.embedding)?;
        match mode {
            Mode::Enroll => {
                let name = submission.name.ok_or(FacegateError::MissingIdentifier)?;
                self.enroll(partition, &name, embedding)
                    .map(SubmissionOutcome::Enrollment)
            }
            Mode::Recognize => self
                .recognize(partition, &embedding)
                .map(SubmissionOutcome::Match),
        }
    }

    /// Server identities are averaged over several samples; device
    /// identities arrive already averaged and are stored directly.
    pub fn enroll(
        &self,
        partition: Partition,
        name: &str,
        embedding: Embedding,
    ) -> Result<EnrollmentStatus> {
        let name = partition.canonical_name(name)?;
        let store = self.stores.get(partition);
        match partition {
            Partition::Server => self.enrollment.add_sample(store, &name, embedding),
            Partition::Device => {
                store.put(&name, embedding)?;
                info!("stored device identity '{}'", name);
                Ok(EnrollmentStatus::Complete { name })
            }
        }
    }

    /// Match against one partition and audit the decision.
    pub fn recognize(&self, partition: Partition, query: &Embedding) -> Result<MatchOutcome> {
        let outcome = self
            .matcher
            .match_query(self.stores.get(partition), query)?;

        let status = match outcome {
            MatchOutcome::Accepted { .. } => ResultStatus::Success,
            MatchOutcome::Rejected { .. } => ResultStatus::Error,
            MatchOutcome::EmptyStore => return Ok(outcome),
        };
        info!(
            "recognition on {}: {} (score {:.3})",
            partition,
            outcome.label(),
            outcome.score().unwrap_or_default()
        );
        self.audit.append(NewResult {
            status,
            label: outcome.label().to_string(),
            score: outcome.score(),
            origin: partition,
        })?;
        Ok(outcome)
    }

    pub fn list(&self, partition: Partition) -> Vec<String> {
        self.stores.get(partition).list()
    }

    pub fn export(&self, partition: Partition) -> BTreeMap<String, Vec<f32>> {
        self.stores
            .get(partition)
            .list_all()
            .into_iter()
            .map(|(name, e)| (name, e.to_vec()))
            .collect()
    }

    pub fn delete(&self, partition: Partition, name: &str) -> Result<()> {
        self.stores.get(partition).delete(name)
    }

    pub fn clear(&self, partition: Partition) -> Result<()> {
        self.stores.get(partition).clear()?;
        info!("cleared {} partition", partition);
        Ok(())
    }

    pub fn pending_enrollments(&self) -> Vec<PendingEnrollment> {
        self.enrollment.pending()
    }

    /// Interval for the stale-enrollment sweeper.
    pub fn prune_interval(ttl: Duration) -> Duration {
        (ttl / 2).max(Duration::from_secs(1))
    }
}
