//! Checkout Engine
//!
//! The checkout engine converges storefront orders to a single consistent status, even though the payment signals
//! that drive it arrive asynchronously, out of order, more than once, or not at all. Payments come through one of two
//! rails, a card-network processor or a blockchain transfer, and a single checkout can produce a batch of sibling
//! orders that must be confirmed together.
//!
//! The library is divided into these sections:
//! 1. The order store ([`traits::OrderStore`]) and its SQLite implementation ([`SqliteDatabase`]). Every status change
//!    the store offers is a conditioned write. That is the only thing standing between concurrent confirmation
//!    attempts, since the engine holds no locks of its own.
//! 2. The confirmation engine and batch coordinator ([`ConfirmationApi`]), plus the merchant-facing status flow
//!    ([`OrderStatusApi`]).
//! 3. The reconciliation sweepers ([`mod@sweepers`]), which clean up abandoned drafts, report orders stuck in
//!    `pending_payment`, and verify blockchain payments against the ledger ([`mod@ledger`]).
//!
//! The engine publishes events when an order is confirmed and when a blockchain transaction fails verification. See
//! [`mod@events`] for how to hook into them.
mod ce_api;

pub mod db_types;
pub mod events;
pub mod ledger;
pub mod sweepers;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use ce_api::{
    confirmation_api::ConfirmationApi,
    confirmation_objects::{BatchConfirmation, ConfirmationResult, ConfirmationStatus, OrderOutcome, OrderResult},
    errors::{ConfirmationError, ErrorKind, StatusUpdateError},
    order_status_api::OrderStatusApi,
    retry::{OverrideGuard, RetryPolicy, TransientError},
};
#[cfg(feature = "sqlite")]
pub use sqlite::{db::db_url, SqliteDatabase};
pub use traits::{LedgerVerifier, OrderStore};
