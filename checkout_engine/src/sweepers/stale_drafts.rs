use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    ce_api::retry::RetryPolicy,
    db_types::OrderNumber,
    sweepers::SweepError,
    traits::OrderStore,
};

pub const DEFAULT_DRAFT_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Drafts created strictly before this moment were eligible.
    pub cutoff: DateTime<Utc>,
    pub removed: usize,
    pub removed_orders: Vec<OrderNumber>,
}

/// Deletes `draft` orders that are older than the age threshold and never received a payment reference.
///
/// Running it twice in a row removes nothing the second time.
pub struct StaleDraftCleanup<B> {
    db: B,
    retry: RetryPolicy,
}

impl<B> StaleDraftCleanup<B> {
    pub fn new(db: B) -> Self {
        Self { db, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl<B: OrderStore> StaleDraftCleanup<B> {
    pub async fn run(&self, max_age: Duration) -> Result<CleanupReport, SweepError> {
        self.run_at(Utc::now(), max_age).await
    }

    /// Runs the cleanup as if the current time were `now`.
    pub async fn run_at(&self, now: DateTime<Utc>, max_age: Duration) -> Result<CleanupReport, SweepError> {
        if max_age <= Duration::zero() {
            return Err(SweepError::InvalidThreshold(format!("{} seconds", max_age.num_seconds())));
        }
        let cutoff = now - max_age;
        trace!("🧹️ Removing drafts created before {cutoff}");
        let deleted = self.retry.run("delete stale drafts", || self.db.delete_stale_drafts(cutoff)).await?;
        let removed_orders = deleted.into_iter().map(|o| o.order_number).collect::<Vec<_>>();
        if removed_orders.is_empty() {
            debug!("🧹️ No stale drafts found");
        } else {
            info!("🧹️ Removed {} stale drafts: {:?}", removed_orders.len(), removed_orders);
        }
        Ok(CleanupReport { cutoff, removed: removed_orders.len(), removed_orders })
    }
}
