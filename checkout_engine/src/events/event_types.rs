use serde::{Deserialize, Serialize};

use crate::db_types::{ConfirmationTier, Order, PaymentRail};

/// Published every time an order freshly transitions to `confirmed`. Idempotent no-op confirmations do not publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmedEvent {
    pub order: Order,
    pub tier: ConfirmationTier,
    pub rail: Option<PaymentRail>,
}

impl OrderConfirmedEvent {
    pub fn new(order: Order, tier: ConfirmationTier, rail: Option<PaymentRail>) -> Self {
        Self { order, tier, rail }
    }
}

/// Published when a blockchain payment could not be verified against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFailedEvent {
    pub order: Order,
    pub reason: String,
}

impl TransactionFailedEvent {
    pub fn new<S: Into<String>>(order: Order, reason: S) -> Self {
        Self { order, reason: reason.into() }
    }
}
