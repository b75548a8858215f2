//! Validates submissions and persists them atomically.

use std::sync::Arc;

use tracing::instrument;

use crate::config::LeaderboardConfig;
use crate::error::LeaderboardError;
use crate::metrics::LeaderboardMetrics;
use crate::record::Record;
use crate::store::{bounded, LeaderboardStore, StoreTransaction};
use crate::submission::{Submission, ValidSubmission};

/// Accepts submissions and writes the record and its optional replay as one
/// unit: either both become visible or neither does.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: Arc<dyn LeaderboardStore>,
    config: Arc<LeaderboardConfig>,
    metrics: Arc<LeaderboardMetrics>,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        config: Arc<LeaderboardConfig>,
        metrics: Arc<LeaderboardMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Validate and persist a submission, returning the stored record.
    ///
    /// Validation failures are returned before the store is touched. Any
    /// storage failure is reported as an opaque `PersistenceError`.
    ///
    /// `store_timeout` bounds opening the transaction and staging the
    /// inserts; expiry there drops the transaction and leaves both tables
    /// unchanged. The commit is not bounded, so the returned result always
    /// matches what was stored.
    #[instrument(skip(self, submission), fields(backend = self.store.backend_name()))]
    pub async fn submit(&self, submission: Submission) -> Result<Record, LeaderboardError> {
        let valid = match submission.validate() {
            Ok(valid) => valid,
            Err(e) => {
                self.metrics.submissions_rejected.inc();
                tracing::debug!(error = %e, "submission rejected");
                return Err(e);
            }
        };

        let has_replay = valid.replay.is_some();
        match self.persist(&valid).await {
            Ok(record) => {
                self.metrics.submissions_accepted.inc();
                if has_replay {
                    self.metrics.replays_stored.inc();
                }
                tracing::info!(
                    record_id = %record.id,
                    stage = %record.stage_number,
                    time = record.time.seconds(),
                    has_replay,
                    "record saved"
                );
                Ok(record)
            }
            Err(e) => {
                self.metrics.persistence_failures.inc();
                tracing::warn!(error = %e, "failed to save record");
                Err(LeaderboardError::PersistenceError {
                    reason: "failed to save record".to_string(),
                    source: Some(Box::new(e)),
                })
            }
        }
    }

    async fn persist(&self, valid: &ValidSubmission) -> Result<Record, LeaderboardError> {
        let (tx, record) = bounded(
            self.config.store_timeout,
            "save submission",
            self.stage(valid),
        )
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Open a transaction and write the record and replay into it. On
    /// failure the transaction is rolled back before returning.
    async fn stage(
        &self,
        valid: &ValidSubmission,
    ) -> Result<(Box<dyn StoreTransaction>, Record), LeaderboardError> {
        let mut tx = self.store.begin_transaction().await?;

        let written = async {
            let record = tx.insert_record(&valid.record).await?;
            if let Some(payload) = &valid.replay {
                tx.insert_replay(record.id, record.stage_number, payload)
                    .await?;
            }
            Ok::<_, LeaderboardError>(record)
        }
        .await;

        match written {
            Ok(record) => Ok((tx, record)),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
