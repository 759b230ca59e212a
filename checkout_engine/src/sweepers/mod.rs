//! # Reconciliation sweepers
//!
//! Stateless, repeatable scans that find orders left behind by lost or delayed payment signals.
//!
//! * [`StaleDraftCleanup`] deletes drafts that never received a payment reference.
//! * [`PendingPaymentMonitor`] reports orders stuck in `pending_payment`. It never writes.
//! * [`PendingTransactionVerifier`] checks blockchain payments against the ledger and confirms the orders that match.
//!
//! The sweepers only ever touch `draft` and `pending_payment` orders, and they go through the same conditioned writes
//! as the confirmation engine, so a sweep can never undo a confirmation that has already been committed.
use thiserror::Error;

use crate::traits::StoreError;

mod pending_report;
mod pending_verifier;
mod stale_drafts;

pub use pending_report::{
    PendingPaymentMonitor,
    PendingPaymentReport,
    PendingStats,
    DEFAULT_PENDING_MAX_AGE_HOURS,
    DEFAULT_PENDING_REPORT_LIMIT,
};
pub use pending_verifier::{
    PendingTransactionVerifier,
    VerificationOutcome,
    VerificationReport,
    VerificationResult,
    DEFAULT_VERIFY_BATCH_SIZE,
};
pub use stale_drafts::{CleanupReport, StaleDraftCleanup, DEFAULT_DRAFT_MAX_AGE_HOURS};

/// A sweep could not run at all. Problems with individual orders are reported in the sweep results instead.
#[derive(Debug, Clone, Error)]
pub enum SweepError {
    #[error("Invalid age threshold: {0}")]
    InvalidThreshold(String),
    #[error("The order store is unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Order store error: {0}")]
    StoreError(String),
}

impl SweepError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SweepError::StoreUnavailable(_))
    }
}

impl From<StoreError> for SweepError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(s) => SweepError::StoreUnavailable(s),
            e => SweepError::StoreError(e.to_string()),
        }
    }
}
