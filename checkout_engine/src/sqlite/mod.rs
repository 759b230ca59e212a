//! SQLite backend for the checkout engine.
//!
//! [`SqliteDatabase`] implements [`crate::traits::OrderStore`]. The conditioned writes map onto single
//! `UPDATE ... WHERE status IN (...) RETURNING *` statements, so SQLite's own write serialisation is what decides which
//! of several concurrent confirmation attempts wins.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
