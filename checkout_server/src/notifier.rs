//! Outbound notifications.
//!
//! Every fresh confirmation is POSTed as JSON to the configured webhook. Without a webhook the events are only logged.
//! Delivery is best effort: failures are logged and never affect the confirmation that produced the event.
use std::time::Duration;

use checkout_engine::events::{EventHandlers, EventHooks, OrderConfirmedEvent, TransactionFailedEvent};
use futures::future::BoxFuture;
use log::*;
use reqwest::Client;
use serde_json::json;

use crate::errors::ServerError;

pub const NOTIFIER_EVENT_BUFFER_SIZE: usize = 25;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub fn create_notification_handlers(webhook_url: Option<String>) -> Result<EventHandlers, ServerError> {
    let mut hooks = EventHooks::default();
    match webhook_url {
        Some(url) => {
            let client = Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .map_err(|e| ServerError::InitializeError(format!("Could not create the webhook client. {e}")))?;
            info!("📣️ Order confirmations will be posted to the configured webhook");
            hooks.on_order_confirmed(move |ev| post_confirmation(client.clone(), url.clone(), ev));
        },
        None => {
            info!("📣️ No webhook is configured. Order confirmations will only be logged");
            hooks.on_order_confirmed(|ev| {
                info!(
                    "📣️ Order {} confirmed ({} tier) with reference {}",
                    ev.order.order_number,
                    ev.tier,
                    ev.order.payment_reference.as_ref().map(|r| r.as_str()).unwrap_or("none")
                );
                no_op()
            });
        },
    }
    hooks.on_transaction_failed(|ev: TransactionFailedEvent| {
        warn!("📣️ Blockchain payment for order {} could not be verified. {}", ev.order.order_number, ev.reason);
        no_op()
    });
    Ok(EventHandlers::new(NOTIFIER_EVENT_BUFFER_SIZE, hooks))
}

fn post_confirmation(client: Client, url: String, ev: OrderConfirmedEvent) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let number = ev.order.order_number.clone();
        let body = json!({
            "event": "order_confirmed",
            "order": ev.order,
            "tier": ev.tier,
            "rail": ev.rail,
        });
        match client.post(url.as_str()).json(&body).send().await {
            Ok(res) if res.status().is_success() => debug!("📣️ Confirmation of order {number} delivered"),
            Ok(res) => error!("📣️ The webhook rejected the confirmation of order {number}. Status: {}", res.status()),
            Err(e) => error!("📣️ Could not deliver the confirmation of order {number}. {e}"),
        }
    })
}

fn no_op() -> BoxFuture<'static, ()> {
    Box::pin(async {})
}
