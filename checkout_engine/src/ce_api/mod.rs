//! # Checkout engine public API
//!
//! * [`confirmation_api`] holds the confirmation engine and the batch coordinator. This is what payment signals
//!   (processor webhooks, client-side fallbacks, operator tools and the reconciliation sweepers) call into.
//! * [`order_status_api`] covers the merchant-facing status changes after confirmation, including cancellation and
//!   its reversal.
//!
//! Both APIs are created from a backend that implements [`crate::traits::OrderStore`]:
//!
//! ```rust,ignore
//! use checkout_engine::{events::EventProducers, ConfirmationApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url("sqlite://data/checkout_store.db", 5).await?;
//! let api = ConfirmationApi::new(db, EventProducers::default());
//! let result = api.confirm("1001", "ch_3NkPqR2eZvKYlo2C", None).await?;
//! ```
pub mod confirmation_api;
pub mod confirmation_objects;
pub mod errors;
pub mod order_status_api;
pub mod retry;
