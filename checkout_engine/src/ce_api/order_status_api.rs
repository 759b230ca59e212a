use std::fmt::Debug;

use log::*;

use crate::{
    ce_api::{errors::StatusUpdateError, retry::RetryPolicy},
    db_types::{Order, OrderNumber, OrderStatusType},
    traits::OrderStore,
};

/// `OrderStatusApi` handles the merchant side of the order lifecycle once payment has been confirmed:
/// `confirmed -> preparing -> shipped -> delivered`, plus cancelling an order and undoing the cancellation.
///
/// Like the confirmation engine, every change here is a conditioned write on the status that was just read. If another
/// update lands in between, the call fails with [`StatusUpdateError::Contended`] rather than overwriting it.
pub struct OrderStatusApi<B> {
    db: B,
    retry: RetryPolicy,
}

impl<B> Debug for OrderStatusApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderStatusApi")
    }
}

impl<B> OrderStatusApi<B> {
    pub fn new(db: B) -> Self {
        Self { db, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl<B> OrderStatusApi<B>
where B: OrderStore
{
    /// Moves a confirmed order one step along the fulfilment flow and returns the updated order.
    pub async fn advance_fulfilment(&self, number: &OrderNumber) -> Result<Order, StatusUpdateError> {
        let order = self.fetch(number).await?;
        let next = order.status.next_fulfilment_step().ok_or_else(|| StatusUpdateError::InvalidTransition {
            order: order.order_number.clone(),
            from: order.status,
            to: order.status,
        })?;
        let updated = self.transition(&order, next).await?;
        info!("📝️ Order {} moved from {} to {next}", order.order_number, order.status);
        Ok(updated)
    }

    /// Cancels the order. Anything that has not been delivered can be cancelled. The status at the time of
    /// cancellation is recorded in the same write, so that [`Self::uncancel`] can restore it.
    pub async fn cancel(&self, number: &OrderNumber) -> Result<Order, StatusUpdateError> {
        let order = self.fetch(number).await?;
        if order.status.is_terminal() || order.status == OrderStatusType::Cancelled {
            return Err(StatusUpdateError::InvalidTransition {
                order: order.order_number,
                from: order.status,
                to: OrderStatusType::Cancelled,
            });
        }
        let cancelled = self
            .retry
            .run("cancel order", || self.db.cancel_order(order.id, order.status))
            .await?
            .ok_or_else(|| StatusUpdateError::Contended(order.order_number.clone()))?;
        info!("📝️ Order {} was cancelled while {}", order.order_number, order.status);
        Ok(cancelled)
    }

    /// Reverses a cancellation, putting the order back in the status it had when it was cancelled.
    ///
    /// Orders cancelled without a record of their earlier status are restored from what they carry: an order with a
    /// confirmed payment goes back to `confirmed`, one with only a payment reference to `pending_payment`, and
    /// anything else to `draft`.
    pub async fn uncancel(&self, number: &OrderNumber) -> Result<Order, StatusUpdateError> {
        let order = self.fetch(number).await?;
        if order.status != OrderStatusType::Cancelled {
            return Err(StatusUpdateError::InvalidTransition {
                order: order.order_number,
                from: order.status,
                to: order.status,
            });
        }
        let recorded = order.payment_metadata.status_before_cancel;
        let restore_to = restore_target(&order);
        if recorded.is_none() {
            warn!(
                "📝️ Order {} has no record of its status before cancellation. Restoring it to {restore_to}",
                order.order_number
            );
        }
        let restored = self
            .retry
            .run("uncancel order", || self.db.restore_cancelled(order.id, recorded, restore_to))
            .await?
            .ok_or_else(|| StatusUpdateError::Contended(order.order_number.clone()))?;
        info!("📝️ Cancellation of order {} reversed. It is back in {restore_to}", order.order_number);
        Ok(restored)
    }

    async fn fetch(&self, number: &OrderNumber) -> Result<Order, StatusUpdateError> {
        self.retry
            .run("fetch order", || self.db.fetch_order_by_number(number))
            .await?
            .ok_or_else(|| StatusUpdateError::OrderNotFound(number.as_str().to_string()))
    }

    async fn transition(&self, order: &Order, to: OrderStatusType) -> Result<Order, StatusUpdateError> {
        let from = order.status;
        self.retry
            .run("transition status", || self.db.transition_status(order.id, from, to))
            .await?
            .ok_or_else(|| StatusUpdateError::Contended(order.order_number.clone()))
    }
}

/// The status a cancelled order returns to when the cancellation is undone.
fn restore_target(order: &Order) -> OrderStatusType {
    if let Some(status) = order.payment_metadata.status_before_cancel {
        return status;
    }
    let metadata = &order.payment_metadata;
    match &order.payment_reference {
        Some(r) if !r.is_blank() => {
            if metadata.confirmed_at.is_some() || metadata.confirmation_tier.is_some() {
                OrderStatusType::Confirmed
            } else {
                OrderStatusType::PendingPayment
            }
        },
        _ => OrderStatusType::Draft,
    }
}
