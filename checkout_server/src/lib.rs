//! # Checkout server
//! This crate hosts the server for the checkout engine. It is responsible for:
//! * Receiving payment signals for orders and batches and passing them to the confirmation engine.
//! * Letting the merchant move confirmed orders through fulfilment, and cancel or restore orders.
//! * Running the reconciliation sweepers on a schedule, and on demand.
//! * Forwarding order confirmations to a webhook.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `GET /health`: A health check route that returns a 200 OK response.
//! * `POST /confirm`: Confirm an order, or the batch it belongs to, with a payment reference.
//! * `POST /confirm_batch`: Confirm every order in a batch with one payment reference.
//! * `POST /orders/{order_number}/advance`, `/cancel`, `/uncancel`: Merchant status updates.
//! * `POST /sweeps/stale_drafts`: Remove abandoned drafts.
//! * `GET /sweeps/pending_report`: Report orders stuck in `pending_payment`.
//! * `POST /sweeps/verify_pending`: Verify pending blockchain payments against the ledger.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod notifier;
pub mod routes;
pub mod server;
pub mod workers;
