//! Alert lifecycle store
//!
//! Thin layer over an [`AlertRepository`] that owns the lifecycle rules:
//! alerts are created once, only ever gain notification outcomes, and are
//! resolved at most once.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument};

use crate::model::{Alert, AlertCandidate, AlertId, IndicatorId, NotificationOutcome};
use crate::storage::{AlertRepository, StorageResult};

#[derive(Clone)]
pub struct AlertStore {
    repo: Arc<dyn AlertRepository>,
}

impl AlertStore {
    pub fn new(repo: Arc<dyn AlertRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, candidate), fields(indicator_id = candidate.indicator_id, severity = %candidate.severity))]
    pub async fn create(&self, candidate: AlertCandidate) -> StorageResult<Alert> {
        let alert = self.repo.insert_alert(candidate).await?;
        info!("alert {} raised: {}", alert.id, alert.message);
        Ok(alert)
    }

    /// Resolve `id`. Returns `false` if the alert does not exist or is already resolved.
    #[instrument(skip(self, notes))]
    pub async fn resolve(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> StorageResult<bool> {
        let resolved = self
            .repo
            .resolve_alert(id, resolved_by, notes, Utc::now())
            .await?;

        if resolved {
            info!("alert {id} resolved by {resolved_by}");
        } else {
            debug!("alert {id} not resolved (missing or already resolved)");
        }

        Ok(resolved)
    }

    /// Resolve every alert in `ids` independently and return how many were resolved.
    ///
    /// A failing id does not undo or stop the others.
    #[instrument(skip(self, ids, notes), fields(count = ids.len()))]
    pub async fn bulk_resolve(
        &self,
        ids: &[AlertId],
        resolved_by: &str,
        notes: Option<&str>,
    ) -> usize {
        let mut resolved = 0;

        for id in ids {
            match self.resolve(*id, resolved_by, notes).await {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => error!("failed to resolve alert {id}: {e}"),
            }
        }

        resolved
    }

    pub async fn attach_notifications(
        &self,
        id: AlertId,
        outcomes: &[NotificationOutcome],
    ) -> StorageResult<()> {
        self.repo.append_notifications(id, outcomes).await
    }

    pub async fn get(&self, id: AlertId) -> StorageResult<Option<Alert>> {
        self.repo.get_alert(id).await
    }

    pub async fn unresolved(&self, indicator_id: Option<IndicatorId>) -> StorageResult<Vec<Alert>> {
        self.repo.unresolved_alerts(indicator_id).await
    }

    pub(crate) fn repository(&self) -> &Arc<dyn AlertRepository> {
        &self.repo
    }
}
