use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db_types::{OrderNumber, OrderStatusType, PaymentReference, UnknownRail},
    traits::StoreError,
};

/// Coarse classification of confirmation failures, so that callers can branch on what to do next without matching
/// every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The order or batch does not exist. Retrying will not help.
    NotFound,
    /// The order is tied to a different payment. Needs an operator, never resolved automatically.
    Conflict,
    /// The store or ledger could not be reached. Retry later.
    Transient,
    /// The ledger transaction does not match what the order expected.
    VerificationMismatch,
    /// The request itself is unusable.
    Invalid,
    /// Anything else that went wrong in a backend.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "details", rename_all = "snake_case")]
pub enum ConfirmationError {
    #[error("The payment reference is empty")]
    InvalidReference,
    #[error("No order or batch matches '{0}'")]
    OrderNotFound(String),
    #[error("Order {order} is already confirmed with payment reference {existing:?}, which differs from {supplied}")]
    Conflict { order: OrderNumber, existing: Option<PaymentReference>, supplied: PaymentReference },
    #[error("Payment reference {reference} has already confirmed order {order}, which is not part of this checkout")]
    ReferenceInUse { reference: PaymentReference, order: OrderNumber },
    #[error("Order {0} is cancelled and cannot be confirmed")]
    OrderCancelled(OrderNumber),
    #[error("The order store is unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Order {0} kept changing underneath the confirmation attempt. Try again")]
    Contended(OrderNumber),
    #[error("'{0}' is not a known payment rail")]
    UnknownRail(String),
    #[error("The forced override limit has been reached. Order {0} needs manual attention")]
    OverrideRateLimited(OrderNumber),
    #[error("Order store error: {0}")]
    StoreError(String),
}

impl ConfirmationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfirmationError::InvalidReference | ConfirmationError::UnknownRail(_) => ErrorKind::Invalid,
            ConfirmationError::OrderNotFound(_) => ErrorKind::NotFound,
            ConfirmationError::Conflict { .. } |
            ConfirmationError::ReferenceInUse { .. } |
            ConfirmationError::OrderCancelled(_) => ErrorKind::Conflict,
            ConfirmationError::StoreUnavailable(_) |
            ConfirmationError::Contended(_) |
            ConfirmationError::OverrideRateLimited(_) => ErrorKind::Transient,
            ConfirmationError::StoreError(_) => ErrorKind::Internal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<StoreError> for ConfirmationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(s) => ConfirmationError::StoreUnavailable(s),
            StoreError::OrderNotFound(id) => ConfirmationError::OrderNotFound(id.to_string()),
            e => ConfirmationError::StoreError(e.to_string()),
        }
    }
}

impl From<UnknownRail> for ConfirmationError {
    fn from(e: UnknownRail) -> Self {
        ConfirmationError::UnknownRail(e.0)
    }
}

/// Errors from merchant-facing status changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusUpdateError {
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Order {order} cannot move from {from} to {to}")]
    InvalidTransition { order: OrderNumber, from: OrderStatusType, to: OrderStatusType },
    #[error("Order {0} changed while its status was being updated. Try again")]
    Contended(OrderNumber),
    #[error("The order store is unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Order store error: {0}")]
    StoreError(String),
}

impl From<StoreError> for StatusUpdateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(s) => StatusUpdateError::StoreUnavailable(s),
            StoreError::OrderNotFound(id) => StatusUpdateError::OrderNotFound(id.to_string()),
            e => StatusUpdateError::StoreError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification() {
        let conflict = ConfirmationError::Conflict {
            order: "1001".into(),
            existing: Some("ch_a".into()),
            supplied: "ch_b".into(),
        };
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_conflict());
        let err: ConfirmationError = StoreError::Unavailable("database is locked".into()).into();
        assert_eq!(err.kind(), ErrorKind::Transient);
        let err: ConfirmationError = StoreError::OrderNotFound(7).into();
        assert_eq!(err, ConfirmationError::OrderNotFound("7".into()));
        let err: ConfirmationError = UnknownRail("paypal".into()).into();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn serializes_with_a_tag() {
        let err = ConfirmationError::OrderCancelled("1002".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "order_cancelled");
        assert_eq!(json["details"], "1002");
    }
}
