use chrono::Utc;
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    ce_api::{
        confirmation_api::ConfirmationApi,
        errors::{ConfirmationError, ErrorKind},
        retry::RetryPolicy,
    },
    db_types::{Order, OrderNumber, TokenAmount, VerificationRecord, VerificationStatus},
    events::{EventProducers, TransactionFailedEvent},
    ledger::{is_plausible_signature, verify_transfer, TransferExpectation, VerificationMismatch, DEFAULT_AMOUNT_TOLERANCE},
    sweepers::SweepError,
    traits::{LedgerVerifier, OrderStore},
};

pub const DEFAULT_VERIFY_BATCH_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The transfer matched and the order (with its batch) was confirmed.
    Confirmed { amount: TokenAmount, sender: String },
    /// The transfer is missing or does not match. The order stays in `pending_payment` for review.
    Failed { kind: ErrorKind, reason: String },
    /// The ledger or store could not be reached. The order will be looked at again by the next sweep.
    Deferred { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub order_id: i64,
    pub order_number: OrderNumber,
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub results: Vec<VerificationResult>,
}

impl VerificationReport {
    fn push(&mut self, order: &Order, outcome: VerificationOutcome) {
        self.examined += 1;
        match &outcome {
            VerificationOutcome::Confirmed { .. } => self.confirmed += 1,
            VerificationOutcome::Failed { .. } => self.failed += 1,
            VerificationOutcome::Deferred { .. } => self.deferred += 1,
        }
        self.results.push(VerificationResult {
            order_id: order.id,
            order_number: order.order_number.clone(),
            outcome,
        });
    }
}

/// Checks blockchain-rail orders that are waiting for payment against the ledger, and confirms the ones whose
/// transfer is found and matches.
///
/// Each run looks at a bounded number of orders, since ledger nodes are usually rate limited. Problems with one order
/// are recorded and logged, and the scan moves on to the next one.
pub struct PendingTransactionVerifier<B, L> {
    confirmations: ConfirmationApi<B>,
    ledger: L,
    producers: EventProducers,
    merchant_wallet: Option<String>,
    tolerance: TokenAmount,
    ledger_retry: RetryPolicy,
}

impl<B, L> PendingTransactionVerifier<B, L> {
    pub fn new(confirmations: ConfirmationApi<B>, ledger: L, producers: EventProducers) -> Self {
        Self {
            confirmations,
            ledger,
            producers,
            merchant_wallet: None,
            tolerance: DEFAULT_AMOUNT_TOLERANCE,
            ledger_retry: RetryPolicy::default(),
        }
    }

    /// Only accept transfers into this wallet.
    pub fn with_merchant_wallet(mut self, wallet: Option<String>) -> Self {
        self.merchant_wallet = wallet.filter(|w| !w.trim().is_empty());
        self
    }

    pub fn with_tolerance(mut self, tolerance: TokenAmount) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn with_ledger_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.ledger_retry = retry;
        self
    }
}

impl<B, L> PendingTransactionVerifier<B, L>
where
    B: OrderStore,
    L: LedgerVerifier,
{
    pub async fn run(&self, limit: u32) -> Result<VerificationReport, SweepError> {
        let db = self.confirmations.db();
        let retry = self.confirmations.retry_policy();
        let orders = retry.run("fetch unverified orders", || db.fetch_unverified_blockchain_orders(limit)).await?;
        debug!("🔍️ {} blockchain orders are waiting for verification", orders.len());
        let mut report = VerificationReport::default();
        for order in orders {
            let outcome = self.process(&order).await;
            report.push(&order, outcome);
        }
        if report.examined > 0 {
            info!(
                "🔍️ Verification sweep complete. {} examined, {} confirmed, {} failed, {} deferred",
                report.examined, report.confirmed, report.failed, report.deferred
            );
        }
        Ok(report)
    }

    async fn process(&self, order: &Order) -> VerificationOutcome {
        let outcome = match self.check(order).await {
            Ok(outcome) => outcome,
            Err(mismatch) => VerificationOutcome::Failed { kind: ErrorKind::VerificationMismatch, reason: mismatch.to_string() },
        };
        let record = match &outcome {
            VerificationOutcome::Confirmed { amount, sender } => VerificationRecord {
                status: VerificationStatus::Verified,
                reason: None,
                observed_amount: Some(*amount),
                observed_sender: Some(sender.clone()),
                checked_at: Utc::now(),
            },
            VerificationOutcome::Failed { reason, .. } => {
                error!("🔍️ Transaction failed for order {}: {reason}", order.order_number);
                let event = TransactionFailedEvent::new(order.clone(), reason.clone());
                self.producers.publish_transaction_failed(event).await;
                VerificationRecord {
                    status: VerificationStatus::Failed,
                    reason: Some(reason.clone()),
                    observed_amount: None,
                    observed_sender: None,
                    checked_at: Utc::now(),
                }
            },
            VerificationOutcome::Deferred { reason } => {
                warn!("🔍️ Verification of order {} deferred: {reason}", order.order_number);
                VerificationRecord {
                    status: VerificationStatus::Deferred,
                    reason: Some(reason.clone()),
                    observed_amount: None,
                    observed_sender: None,
                    checked_at: Utc::now(),
                }
            },
        };
        let db = self.confirmations.db();
        let retry = self.confirmations.retry_policy();
        if let Err(e) = retry.run("record verification", || db.record_verification(order.id, record.clone())).await {
            error!("🔍️ Could not record the verification outcome for order {}. {e}", order.order_number);
        }
        outcome
    }

    /// Looks the transaction up and, if it matches, confirms the order. Mismatches come back as `Err`. Problems that
    /// might go away by themselves come back as `Ok(Deferred)`.
    async fn check(&self, order: &Order) -> Result<VerificationOutcome, VerificationMismatch> {
        let reference = match &order.payment_reference {
            Some(r) if !r.is_blank() => r,
            _ => return Err(VerificationMismatch::MalformedReference(String::new())),
        };
        if !is_plausible_signature(reference.as_str()) {
            return Err(VerificationMismatch::MalformedReference(reference.to_string()));
        }
        let expected = TransferExpectation::for_order(order)?
            .with_recipient(self.merchant_wallet.clone())
            .with_tolerance(self.tolerance);
        let lookup = self.ledger_retry.run("ledger lookup", || self.ledger.fetch_transaction(reference.as_str())).await;
        let tx = match lookup {
            Ok(Some(tx)) => tx,
            Ok(None) => return Err(VerificationMismatch::TransactionNotFound(reference.to_string())),
            Err(e) => return Ok(VerificationOutcome::Deferred { reason: e.to_string() }),
        };
        let verified = verify_transfer(&tx, &expected)?;
        debug!(
            "🔍️ Transfer of {} from {} for order {} verified",
            verified.amount, verified.sender, order.order_number
        );
        match self.confirmations.recover(order, reference).await {
            Ok(result) => {
                if let Some(error) = result.results.iter().find(|r| r.order_id == order.id).and_then(|r| r.outcome.error()) {
                    return Ok(confirmation_failure(order, error.clone()));
                }
                let failed = result.failures().count();
                if failed > 0 {
                    warn!("🔍️ Order {} verified, but {failed} orders in its batch could not be confirmed", order.order_number);
                }
                Ok(VerificationOutcome::Confirmed { amount: verified.amount, sender: verified.sender })
            },
            Err(e) => Ok(confirmation_failure(order, e)),
        }
    }
}

fn confirmation_failure(order: &Order, e: ConfirmationError) -> VerificationOutcome {
    match e.kind() {
        ErrorKind::Transient | ErrorKind::Internal => VerificationOutcome::Deferred { reason: e.to_string() },
        kind => {
            error!("🔍️ Order {} has a verified payment but could not be confirmed: {e}", order.order_number);
            VerificationOutcome::Failed { kind, reason: e.to_string() }
        },
    }
}
