//! `SqliteDatabase` is a concrete implementation of a checkout engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the [`OrderStore`] trait.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate::MigrateError, SqlitePool};

use super::db::{db_url, new_pool, orders};
use crate::{
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
    traits::{OrderStore, StoreError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl OrderStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), StoreError> {
        let mut tx = self.pool.begin().await?;
        let number = order.order_number.clone();
        let (order, inserted) = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        if inserted {
            debug!("🗃️ Order {number} has been saved in the DB with id {}", order.id);
        } else {
            debug!("🗃️ Order {number} already exists with id {}. Nothing inserted", order.id);
        }
        Ok((order, inserted))
    }

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_id(id, &mut conn).await
    }

    async fn fetch_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_number(number, &mut conn).await
    }

    async fn fetch_batch(&self, batch_id: &BatchId) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_batch(batch_id, &mut conn).await
    }

    async fn fetch_confirmed_by_reference(&self, reference: &PaymentReference) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_confirmed_by_reference(reference, &mut conn).await
    }

    async fn confirm_atomic(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::confirm_atomic(id, reference, rail, &mut conn).await
    }

    async fn advance_to_pending(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::advance_to_pending(id, reference, rail, &mut conn).await
    }

    async fn replace_pending_reference(
        &self,
        id: i64,
        previous: &PaymentReference,
        reference: &PaymentReference,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::replace_pending_reference(id, previous, reference, &mut conn).await
    }

    async fn mark_confirmed(&self, id: i64, reference: &PaymentReference) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::mark_confirmed(id, reference, &mut conn).await
    }

    async fn force_confirm(
        &self,
        id: i64,
        reference: &PaymentReference,
        rail: Option<PaymentRail>,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let result = orders::force_confirm(id, reference, rail, &mut conn).await?;
        warn!("🗃️ Unconditioned confirmation write for order {id} with [{reference}]. Applied: {}", result.is_some());
        Ok(result)
    }

    async fn transition_status(
        &self,
        id: i64,
        from: OrderStatusType,
        to: OrderStatusType,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::transition_status(id, from, to, &mut conn).await
    }

    async fn cancel_order(&self, id: i64, from: OrderStatusType) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::cancel_order(id, from, &mut conn).await
    }

    async fn restore_cancelled(
        &self,
        id: i64,
        recorded: Option<OrderStatusType>,
        to: OrderStatusType,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::restore_cancelled(id, recorded, to, &mut conn).await
    }

    async fn update_payment_metadata(&self, id: i64, metadata: &PaymentMetadata) -> Result<Order, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::update_payment_metadata(id, metadata, &mut conn).await
    }

    async fn record_verification(&self, id: i64, record: VerificationRecord) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let status = record.status;
        let order = orders::record_verification(id, record, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Verification outcome '{status}' recorded for order {}", order.order_number);
        Ok(order)
    }

    async fn delete_stale_drafts(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let deleted = orders::delete_stale_drafts(created_before, &mut conn).await?;
        trace!("🗃️ {} draft orders created before {created_before} deleted", deleted.len());
        Ok(deleted)
    }

    async fn fetch_stale_pending(&self, created_before: DateTime<Utc>, limit: u32) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_stale_pending(created_before, limit, &mut conn).await
    }

    async fn fetch_unverified_blockchain_orders(&self, limit: u32) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_unverified_blockchain_orders(limit, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using the URL in `CKO_DATABASE_URL`
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date. Safe to call on every start-up.
    pub async fn run_migrations(&self) -> Result<(), MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
