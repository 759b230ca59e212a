use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    ce_api::retry::RetryPolicy,
    db_types::{Order, OrderNumber, PaymentRail},
    sweepers::SweepError,
    traits::OrderStore,
};

pub const DEFAULT_PENDING_MAX_AGE_HOURS: i64 = 2;
pub const DEFAULT_PENDING_REPORT_LIMIT: u32 = 200;

/// Age statistics for one group of stuck orders. Ages are in seconds, measured from order creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStats {
    pub count: usize,
    pub oldest_age_secs: i64,
    pub average_age_secs: i64,
    pub orders: Vec<OrderNumber>,
}

impl PendingStats {
    fn from_orders(orders: &[&Order], now: DateTime<Utc>) -> Self {
        if orders.is_empty() {
            return Self::default();
        }
        let ages = orders.iter().map(|o| o.age(now).num_seconds().max(0)).collect::<Vec<i64>>();
        let oldest_age_secs = ages.iter().copied().max().unwrap_or_default();
        let average_age_secs = ages.iter().sum::<i64>() / ages.len() as i64;
        let orders = orders.iter().map(|o| o.order_number.clone()).collect();
        Self { count: ages.len(), oldest_age_secs, average_age_secs, orders }
    }
}

/// Read-only summary of orders stuck in `pending_payment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPaymentReport {
    pub generated_at: DateTime<Utc>,
    /// Orders created strictly before this moment were included.
    pub cutoff: DateTime<Utc>,
    pub total: usize,
    pub by_rail: BTreeMap<PaymentRail, PendingStats>,
    /// Orders with no recorded rail.
    pub unclassified: PendingStats,
    /// True if the scan hit its limit, so there may be more stuck orders than reported.
    pub truncated: bool,
}

/// Reports orders that have been waiting for payment longer than a threshold, grouped by the rail recorded on the
/// order. Nothing is modified.
pub struct PendingPaymentMonitor<B> {
    db: B,
    retry: RetryPolicy,
}

impl<B> PendingPaymentMonitor<B> {
    pub fn new(db: B) -> Self {
        Self { db, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl<B: OrderStore> PendingPaymentMonitor<B> {
    pub async fn run(&self, max_age: Duration, limit: u32) -> Result<PendingPaymentReport, SweepError> {
        self.run_at(Utc::now(), max_age, limit).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>, max_age: Duration, limit: u32) -> Result<PendingPaymentReport, SweepError> {
        if max_age < Duration::zero() {
            return Err(SweepError::InvalidThreshold(format!("{} seconds", max_age.num_seconds())));
        }
        let cutoff = now - max_age;
        let orders = self.retry.run("fetch stale pending orders", || self.db.fetch_stale_pending(cutoff, limit)).await?;
        let report = build_report(&orders, now, cutoff, limit);
        if report.total == 0 {
            debug!("📊️ No orders have been pending payment since before {cutoff}");
        } else {
            warn!(
                "📊️ {} orders have been pending payment since before {cutoff}. Oldest: {}s",
                report.total,
                report.by_rail.values().chain(Some(&report.unclassified)).map(|s| s.oldest_age_secs).max().unwrap_or(0)
            );
        }
        Ok(report)
    }
}

fn build_report(orders: &[Order], now: DateTime<Utc>, cutoff: DateTime<Utc>, limit: u32) -> PendingPaymentReport {
    let mut groups: BTreeMap<PaymentRail, Vec<&Order>> = BTreeMap::new();
    let mut unclassified = Vec::new();
    for order in orders {
        match order.rail {
            Some(rail) => groups.entry(rail).or_default().push(order),
            None => unclassified.push(order),
        }
    }
    let by_rail = groups.into_iter().map(|(rail, orders)| (rail, PendingStats::from_orders(&orders, now))).collect();
    PendingPaymentReport {
        generated_at: now,
        cutoff,
        total: orders.len(),
        by_rail,
        unclassified: PendingStats::from_orders(&unclassified, now),
        truncated: limit > 0 && orders.len() >= limit as usize,
    }
}
