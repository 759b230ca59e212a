use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{types::Json, SqliteConnection};

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
    traits::StoreError,
};

/// Inserts the order into the database, returning `false` in the second parameter if the order already exists.
pub async fn idempotent_insert(order: NewOrder, conn: &mut SqliteConnection) -> Result<(Order, bool), StoreError> {
    let inserted = match fetch_order_by_number(&order.order_number, conn).await? {
        Some(order) => (order, false),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("📝️ Order [{}] inserted with id {}", order.order_number, order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

/// Inserts a new `draft` order into the database using the given connection. This is not atomic. You can embed this
/// call inside a transaction if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, StoreError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_number,
                status,
                batch_id,
                rail,
                amount_expected,
                payer_identity_expected,
                created_at,
                updated_at
            ) VALUES ($1, 'draft', $2, $3, $4, $5, $6, $6)
            RETURNING *;
        "#,
    )
    .bind(order.order_number)
    .bind(order.batch_id)
    .bind(order.rail)
    .bind(order.amount_expected)
    .bind(order.payer_identity_expected)
    .bind(order.created_at)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_number(
    number: &OrderNumber,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE order_number = $1")
        .bind(number.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_batch(batch_id: &BatchId, conn: &mut SqliteConnection) -> Result<Vec<Order>, StoreError> {
    let orders =
        sqlx::query_as("SELECT * FROM orders WHERE batch_id = $1 ORDER BY id").bind(batch_id.as_str()).fetch_all(conn).await?;
    Ok(orders)
}

pub async fn fetch_confirmed_by_reference(
    reference: &PaymentReference,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let orders = sqlx::query_as(
        r#"SELECT * FROM orders WHERE payment_reference = $1
           AND status IN ('confirmed', 'preparing', 'shipped', 'delivered') ORDER BY id"#,
    )
    .bind(reference.as_str())
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

/// Appended to every write that confirms an order with reference `$1`. The write is skipped if `$1` already confirmed
/// an order outside this order's batch, or if another live sibling in the batch carries a different reference.
/// SQLite serializes writers, so the check and the status change cannot be separated by another confirmation.
macro_rules! reference_guard {
    () => {
        r#"
        AND NOT EXISTS (
            SELECT 1 FROM orders other
            WHERE other.id <> orders.id AND (
                (other.payment_reference = $1
                    AND other.status IN ('confirmed', 'preparing', 'shipped', 'delivered')
                    AND (orders.batch_id IS NULL OR other.batch_id IS NULL OR other.batch_id <> orders.batch_id))
                OR (other.batch_id = orders.batch_id
                    AND other.status <> 'cancelled'
                    AND TRIM(COALESCE(other.payment_reference, '')) <> ''
                    AND other.payment_reference <> $1)
            )
        )"#
    };
}

pub(crate) async fn confirm_atomic(
    id: i64,
    reference: &PaymentReference,
    rail: Option<PaymentRail>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(concat!(
        r#"UPDATE orders SET
            status = 'confirmed',
            payment_reference = $1,
            rail = COALESCE(rail, $2),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $3 AND status IN ('draft', 'pending_payment')
          AND (payment_reference IS NULL OR payment_reference = $1)"#,
        reference_guard!(),
        " RETURNING *"
    ))
    .bind(reference.as_str())
    .bind(rail)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Atomic confirmation of order {id} applied: {}", order.is_some());
    Ok(order)
}

pub(crate) async fn advance_to_pending(
    id: i64,
    reference: &PaymentReference,
    rail: Option<PaymentRail>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(
        r#"UPDATE orders SET
            status = 'pending_payment',
            payment_reference = $1,
            rail = COALESCE(rail, $2),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $3 AND status = 'draft' AND payment_reference IS NULL
        RETURNING *"#,
    )
    .bind(reference.as_str())
    .bind(rail)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Order {id} advanced to pending_payment: {}", order.is_some());
    Ok(order)
}

/// Swaps the reference of a `pending_payment` order, provided it still carries `previous`. The replaced reference is
/// appended to `superseded_references` in the payment metadata by the same statement.
pub(crate) async fn replace_pending_reference(
    id: i64,
    previous: &PaymentReference,
    reference: &PaymentReference,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(
        r#"UPDATE orders SET
            payment_reference = $1,
            payment_metadata = json_set(
                payment_metadata,
                '$.superseded_references',
                json_insert(COALESCE(json_extract(payment_metadata, '$.superseded_references'), json_array()), '$[#]', $2)
            ),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $3 AND status = 'pending_payment' AND payment_reference = $2
        RETURNING *"#,
    )
    .bind(reference.as_str())
    .bind(previous.as_str())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Pending reference {previous} of order {id} replaced by {reference}: {}", order.is_some());
    Ok(order)
}

pub(crate) async fn mark_confirmed(
    id: i64,
    reference: &PaymentReference,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(concat!(
        r#"UPDATE orders SET
            status = 'confirmed',
            payment_reference = $1,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND status IN ('pending_payment', 'draft')
          AND (payment_reference IS NULL OR payment_reference = $1)"#,
        reference_guard!(),
        " RETURNING *"
    ))
    .bind(reference.as_str())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Order {id} marked as confirmed: {}", order.is_some());
    Ok(order)
}

/// No status precondition, but an order confirmed with another reference is never overwritten, and the reference
/// guard still applies.
pub(crate) async fn force_confirm(
    id: i64,
    reference: &PaymentReference,
    rail: Option<PaymentRail>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(concat!(
        r#"UPDATE orders SET
            status = 'confirmed',
            payment_reference = $1,
            rail = COALESCE(rail, $2),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $3 AND status <> 'cancelled'
          AND NOT (status IN ('confirmed', 'preparing', 'shipped', 'delivered') AND payment_reference IS NOT $1)"#,
        reference_guard!(),
        " RETURNING *"
    ))
    .bind(reference.as_str())
    .bind(rail)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub(crate) async fn transition_status(
    id: i64,
    from: OrderStatusType,
    to: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(
        "UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND status = $3 RETURNING *",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Order {id} {from} -> {to} applied: {}", order.is_some());
    Ok(order)
}

/// Cancels an order that is currently `from`, recording `from` as `status_before_cancel` in the same statement.
pub(crate) async fn cancel_order(
    id: i64,
    from: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(
        r#"UPDATE orders SET
            status = 'cancelled',
            payment_metadata = json_set(payment_metadata, '$.status_before_cancel', $1),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND status = $1
        RETURNING *"#,
    )
    .bind(from)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Order {id} {from} -> cancelled applied: {}", order.is_some());
    Ok(order)
}

/// Moves a cancelled order to `to` and clears `status_before_cancel`. Applies only while the recorded
/// `status_before_cancel` is still `recorded`.
pub(crate) async fn restore_cancelled(
    id: i64,
    recorded: Option<OrderStatusType>,
    to: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as(
        r#"UPDATE orders SET
            status = $1,
            payment_metadata = json_remove(payment_metadata, '$.status_before_cancel'),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND status = 'cancelled'
          AND json_extract(payment_metadata, '$.status_before_cancel') IS $3
        RETURNING *"#,
    )
    .bind(to)
    .bind(id)
    .bind(recorded)
    .fetch_optional(conn)
    .await?;
    trace!("📝️ Order {id} cancelled -> {to} applied: {}", order.is_some());
    Ok(order)
}

/// Merges `metadata` into the stored document with `json_patch`. Fields that `metadata` leaves out keep their stored
/// values.
pub(crate) async fn update_payment_metadata(
    id: i64,
    metadata: &PaymentMetadata,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    let order: Option<Order> = sqlx::query_as(
        r#"UPDATE orders SET
            payment_metadata = json_patch(payment_metadata, $1),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $2
        RETURNING *"#,
    )
    .bind(Json(metadata))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    order.ok_or(StoreError::OrderNotFound(id))
}

/// Reads the order, merges the verification record into its metadata and writes both back. Run this inside a
/// transaction.
pub(crate) async fn record_verification(
    id: i64,
    record: VerificationRecord,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    let order = fetch_order_by_id(id, conn).await?.ok_or(StoreError::OrderNotFound(id))?;
    let status = record.status;
    let mut metadata = order.payment_metadata;
    metadata.last_verification = Some(record);
    let order: Option<Order> = sqlx::query_as(
        r#"UPDATE orders SET
            verification_status = $1,
            payment_metadata = $2,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $3
        RETURNING *"#,
    )
    .bind(status)
    .bind(Json(&metadata))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    order.ok_or(StoreError::OrderNotFound(id))
}

pub(crate) async fn delete_stale_drafts(
    created_before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let orders = sqlx::query_as(
        r#"DELETE FROM orders
        WHERE status = 'draft' AND payment_reference IS NULL AND unixepoch(created_at) < $1
        RETURNING *"#,
    )
    .bind(created_before.timestamp())
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub(crate) async fn fetch_stale_pending(
    created_before: DateTime<Utc>,
    limit: u32,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let orders = sqlx::query_as(
        r#"SELECT * FROM orders
        WHERE status = 'pending_payment' AND unixepoch(created_at) < $1
        ORDER BY created_at ASC
        LIMIT $2"#,
    )
    .bind(created_before.timestamp())
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub(crate) async fn fetch_unverified_blockchain_orders(
    limit: u32,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let orders = sqlx::query_as(
        r#"SELECT * FROM orders
        WHERE status = 'pending_payment'
          AND rail = 'blockchain'
          AND payment_reference IS NOT NULL
          AND (verification_status IS NULL OR verification_status = 'deferred')
        ORDER BY created_at ASC
        LIMIT $1"#,
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}
