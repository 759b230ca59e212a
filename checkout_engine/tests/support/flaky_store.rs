#![allow(dead_code)]
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use checkout_engine::{
    db_types::{
        BatchId,
        NewOrder,
        Order,
        OrderNumber,
        OrderStatusType,
        PaymentMetadata,
        PaymentRail,
        PaymentReference,
        VerificationRecord,
    },
    traits::StoreError,
    OrderStore,
    SqliteDatabase,
};
use chrono::{DateTime, Utc};

/// How a primitive should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// The backend does not offer the primitive.
    Unsupported,
    /// The primitive times out every time.
    Unavailable,
}

impl Fault {
    fn check(&self, name: &'static str) -> Result<(), StoreError> {
        match self {
            Fault::None => Ok(()),
            Fault::Unsupported => Err(StoreError::Unsupported(name)),
            Fault::Unavailable => Err(StoreError::Unavailable(format!("{name} timed out"))),
        }
    }
}

/// Wraps a real database and makes selected confirmation primitives fail.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: SqliteDatabase,
    pub atomic: Fault,
    pub mark_confirmed: Fault,
    pub atomic_calls: Arc<AtomicU32>,
    pub force_calls: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new(inner: SqliteDatabase) -> Self {
        Self {
            inner,
            atomic: Fault::None,
            mark_confirmed: Fault::None,
            atomic_calls: Arc::new(AtomicU32::new(0)),
            force_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn atomic(mut self, fault: Fault) -> Self {
        self.atomic = fault;
        self
    }

    pub fn mark_confirmed(mut self, fault: Fault) -> Self {
        self.mark_confirmed = fault;
        self
    }
}

impl OrderStore for FlakyStore {
    fn url(&self) -> &str {
        self.inner.url()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), StoreError> {
        self.inner.insert_order(order).await
    }

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        self.inner.fetch_order(id).await
    }

    async fn fetch_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        self.inner.fetch_order_by_number(number).await
    }

    async fn fetch_batch(&self, batch_id: &BatchId) -> Result<Vec<Order>, StoreError> {
        self.inner.fetch_batch(batch_id).await
    }

    async fn fetch_confirmed_by_reference(&self, reference: &PaymentReference) -> Result<Vec<Order>, StoreError> {
        self.inner.fetch_confirmed_by_reference(reference).await
    }

    async fn confirm_atomic(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError> {
        self.atomic_calls.fetch_add(1, Ordering::SeqCst);
        self.atomic.check("confirm_atomic")?;
        self.inner.confirm_atomic(id, reference, rail).await
    }

    async fn advance_to_pending(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError> {
        self.inner.advance_to_pending(id, reference, rail).await
    }

    async fn replace_pending_reference(
        &self,
        id: i64,
        previous: &PaymentReference,
        reference: &PaymentReference,
    ) -> Result<Option<Order>, StoreError> {
        self.inner.replace_pending_reference(id, previous, reference).await
    }

    async fn mark_confirmed(&self, id: i64, reference: &PaymentReference) -> Result<Option<Order>, StoreError> {
        self.mark_confirmed.check("mark_confirmed")?;
        self.inner.mark_confirmed(id, reference).await
    }

    async fn force_confirm(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError> {
        self.force_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.force_confirm(id, reference, rail).await
    }

    async fn transition_status(
        &self,
        id: i64,
        from: OrderStatusType,
        to: OrderStatusType,
    ) -> Result<Option<Order>, StoreError> {
        self.inner.transition_status(id, from, to).await
    }

    async fn cancel_order(&self, id: i64, from: OrderStatusType) -> Result<Option<Order>, StoreError> {
        self.inner.cancel_order(id, from).await
    }

    async fn restore_cancelled(
        &self,
        id: i64,
        recorded: Option<OrderStatusType>,
        to: OrderStatusType,
    ) -> Result<Option<Order>, StoreError> {
        self.inner.restore_cancelled(id, recorded, to).await
    }

    async fn update_payment_metadata(&self, id: i64, metadata: &PaymentMetadata) -> Result<Order, StoreError> {
        self.inner.update_payment_metadata(id, metadata).await
    }

    async fn record_verification(&self, id: i64, record: VerificationRecord) -> Result<Order, StoreError> {
        self.inner.record_verification(id, record).await
    }

    async fn delete_stale_drafts(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        self.inner.delete_stale_drafts(created_before).await
    }

    async fn fetch_stale_pending(&self, created_before: DateTime<Utc>, limit: u32) -> Result<Vec<Order>, StoreError> {
        self.inner.fetch_stale_pending(created_before, limit).await
    }

    async fn fetch_unverified_blockchain_orders(&self, limit: u32) -> Result<Vec<Order>, StoreError> {
        self.inner.fetch_unverified_blockchain_orders(limit).await
    }
}
