use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{
    BatchId,
    NewOrder,
    Order,
    OrderNumber,
    OrderStatusType,
    PaymentMetadata,
    PaymentRail,
    PaymentReference,
    VerificationRecord,
};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    /// The store could not be reached, or was too busy to answer. Worth retrying.
    #[error("The order store is temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(i64),
    #[error("Order {0} already exists")]
    DuplicateOrder(OrderNumber),
    /// The backend does not implement this primitive.
    #[error("The order store does not support {0}")]
    Unsupported(&'static str),
    #[error("Stored data could not be interpreted: {0}")]
    DataIntegrity(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                StoreError::Unavailable(e.to_string())
            },
            sqlx::Error::Database(ref db) => {
                let msg = db.message().to_ascii_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    StoreError::Unavailable(e.to_string())
                } else {
                    StoreError::DatabaseError(e.to_string())
                }
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::DataIntegrity(e.to_string()),
            _ => StoreError::DatabaseError(e.to_string()),
        }
    }
}

/// The `OrderStore` trait defines the contract a persistence backend must fulfil for the confirmation engine and the
/// reconciliation sweepers.
///
/// The store is the only shared mutable resource in the system, and there is no application-level locking on top of
/// it. Every status transition is therefore expressed as a *conditioned write*: the update only applies if the order
/// is currently in one of the expected states. The conditioned methods return `Ok(None)` when the precondition did not
/// hold (typically because a concurrent caller got there first), and it is up to the caller to re-read the order and
/// decide what that means.
///
/// [`OrderStore::force_confirm`] is the single exception and should only be reached through the confirmation engine's
/// override guard.
#[allow(async_fn_in_trait)]
pub trait OrderStore: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a new `draft` order. This call is idempotent on the order number.
    /// Returns true in the second parameter if the order was inserted, or false if it already existed.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), StoreError>;

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, StoreError>;

    async fn fetch_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    /// Fetches every order in the batch, ordered by id.
    async fn fetch_batch(&self, batch_id: &BatchId) -> Result<Vec<Order>, StoreError>;

    /// Fetches all orders in `confirmed` or a later state that carry the given payment reference.
    async fn fetch_confirmed_by_reference(&self, reference: &PaymentReference) -> Result<Vec<Order>, StoreError>;

    /// Single-statement transition from `draft` or `pending_payment` straight to `confirmed`, writing the payment
    /// reference in the same statement. The rail is only written if none has been recorded yet.
    ///
    /// Like every confirming write, this one is also conditioned on the reference: the order must carry no reference
    /// or `reference` itself, `reference` must not have confirmed an order outside this order's batch, and no other
    /// live sibling in the batch may carry a different reference.
    async fn confirm_atomic(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError>;

    /// Moves a `draft` order without a reference to `pending_payment` and attaches the payment reference.
    async fn advance_to_pending(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError>;

    /// Replaces the reference of a `pending_payment` order that still carries `previous`, and appends `previous` to
    /// the superseded references in its payment metadata.
    async fn replace_pending_reference(
        &self,
        id: i64,
        previous: &PaymentReference,
        reference: &PaymentReference,
    ) -> Result<Option<Order>, StoreError>;

    /// Moves a `pending_payment` (or, if a concurrent caller skipped a step, `draft`) order to `confirmed`. The same
    /// reference conditions as [`OrderStore::confirm_atomic`] apply.
    async fn mark_confirmed(&self, id: i64, reference: &PaymentReference) -> Result<Option<Order>, StoreError>;

    /// Writes `confirmed` and the reference without a status precondition. Cancelled orders, and orders confirmed
    /// with another reference, are still left alone, and the reference conditions of
    /// [`OrderStore::confirm_atomic`] still apply.
    async fn force_confirm(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError>;

    /// Conditioned status change used by the merchant-facing flow: applies only if the order is currently `from`.
    async fn transition_status(
        &self,
        id: i64,
        from: OrderStatusType,
        to: OrderStatusType,
    ) -> Result<Option<Order>, StoreError>;

    /// Cancels an order that is currently `from`. `from` is recorded as `status_before_cancel` in the same write.
    async fn cancel_order(&self, id: i64, from: OrderStatusType) -> Result<Option<Order>, StoreError>;

    /// Moves a cancelled order to `to` and clears `status_before_cancel`, provided the stored `status_before_cancel`
    /// is still `recorded`.
    async fn restore_cancelled(
        &self,
        id: i64,
        recorded: Option<OrderStatusType>,
        to: OrderStatusType,
    ) -> Result<Option<Order>, StoreError>;

    /// Merges `metadata` into the stored payment metadata. Fields that are not set in `metadata` keep their stored
    /// values, so concurrent writers of different fields do not overwrite each other.
    async fn update_payment_metadata(&self, id: i64, metadata: &PaymentMetadata) -> Result<Order, StoreError>;

    /// Atomically records a ledger verification outcome: sets `verification_status` and stores the record in the
    /// payment metadata. The order status is not touched.
    async fn record_verification(&self, id: i64, record: VerificationRecord) -> Result<Order, StoreError>;

    /// Deletes `draft` orders created strictly before `created_before` that never received a payment reference.
    /// Returns the deleted orders.
    async fn delete_stale_drafts(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    /// Fetches up to `limit` `pending_payment` orders created strictly before `created_before`, oldest first.
    async fn fetch_stale_pending(&self, created_before: DateTime<Utc>, limit: u32) -> Result<Vec<Order>, StoreError>;

    /// Fetches up to `limit` blockchain-rail `pending_payment` orders with a reference that have not yet been verified
    /// (or whose last verification was deferred), oldest first.
    async fn fetch_unverified_blockchain_orders(&self, limit: u32) -> Result<Vec<Order>, StoreError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
