use serde::{Deserialize, Serialize};

use crate::{
    ce_api::errors::ConfirmationError,
    db_types::{BatchId, ConfirmationTier, Order, OrderNumber, PaymentReference},
};

/// What happened to one order during a confirmation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrderOutcome {
    /// This call moved the order to `confirmed`, using the given tier.
    Confirmed { tier: ConfirmationTier },
    /// The order was already confirmed with the same reference. Nothing was written.
    AlreadyConfirmed,
    Failed { error: ConfirmationError },
}

impl OrderOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, OrderOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&ConfirmationError> {
        match self {
            OrderOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: i64,
    pub order_number: OrderNumber,
    #[serde(flatten)]
    pub outcome: OrderOutcome,
}

impl OrderResult {
    pub fn new(order: &Order, outcome: OrderOutcome) -> Self {
        Self { order_id: order.id, order_number: order.order_number.clone(), outcome }
    }

    pub fn failed(order: &Order, error: ConfirmationError) -> Self {
        Self::new(order, OrderOutcome::Failed { error })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Every targeted order is now confirmed, and at least one of them was confirmed by this call.
    Confirmed,
    /// Every targeted order was already confirmed with this reference.
    AlreadyConfirmed,
    /// Some orders are confirmed, others failed. Retry the failed ones.
    Partial,
    Failed,
}

impl ConfirmationStatus {
    pub fn from_outcomes<'a, I: IntoIterator<Item = &'a OrderOutcome>>(outcomes: I) -> Self {
        let (mut fresh, mut noop, mut failed) = (0usize, 0usize, 0usize);
        for outcome in outcomes {
            match outcome {
                OrderOutcome::Confirmed { .. } => fresh += 1,
                OrderOutcome::AlreadyConfirmed => noop += 1,
                OrderOutcome::Failed { .. } => failed += 1,
            }
        }
        match (fresh + noop, failed) {
            (0, _) => ConfirmationStatus::Failed,
            (_, f) if f > 0 => ConfirmationStatus::Partial,
            _ if fresh == 0 => ConfirmationStatus::AlreadyConfirmed,
            _ => ConfirmationStatus::Confirmed,
        }
    }
}

/// Result of [`crate::ConfirmationApi::confirm`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub status: ConfirmationStatus,
    /// The reference the orders were confirmed with. For batches this can differ from the one supplied.
    pub payment_reference: PaymentReference,
    pub order_ids: Vec<i64>,
    pub results: Vec<OrderResult>,
}

impl ConfirmationResult {
    pub fn new(payment_reference: PaymentReference, results: Vec<OrderResult>) -> Self {
        let status = ConfirmationStatus::from_outcomes(results.iter().map(|r| &r.outcome));
        let order_ids = results.iter().map(|r| r.order_id).collect();
        Self { status, payment_reference, order_ids, results }
    }

    pub fn failures(&self) -> impl Iterator<Item = &OrderResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }
}

impl From<BatchConfirmation> for ConfirmationResult {
    fn from(batch: BatchConfirmation) -> Self {
        ConfirmationResult::new(batch.payment_reference, batch.results)
    }
}

/// Result of [`crate::ConfirmationApi::confirm_batch`]. A batch is only reconciled when
/// `confirmed_count == total_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfirmation {
    pub batch_id: BatchId,
    pub payment_reference: PaymentReference,
    /// Siblings that are `confirmed` or later after this call, whether or not this call confirmed them.
    pub confirmed_count: usize,
    pub total_count: usize,
    pub results: Vec<OrderResult>,
}

impl BatchConfirmation {
    pub fn new(batch_id: BatchId, payment_reference: PaymentReference, results: Vec<OrderResult>) -> Self {
        let confirmed_count = results.iter().filter(|r| r.outcome.is_success()).count();
        let total_count = results.len();
        Self { batch_id, payment_reference, confirmed_count, total_count, results }
    }

    pub fn is_complete(&self) -> bool {
        self.total_count > 0 && self.confirmed_count == self.total_count
    }

    /// The ids of the siblings that still need another attempt.
    pub fn failed_order_ids(&self) -> Vec<i64> {
        self.results.iter().filter(|r| !r.outcome.is_success()).map(|r| r.order_id).collect()
    }
}
