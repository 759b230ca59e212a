//! # Backend contracts
//!
//! This module provides the interfaces that the confirmation engine and the reconciliation sweepers consume. Nothing
//! in the engine reaches for a global client: backends are constructed by the caller and handed in.
//!
//! * [`OrderStore`] is the persistent order table. Every status change it offers is a conditioned write, which is
//!   what makes concurrent, uncoordinated confirmation attempts converge.
//! * [`LedgerVerifier`] is the read-only view of the blockchain rail, used to check that a transfer really happened
//!   and that it matches what the order expected.
mod ledger_verifier;
mod order_store;

pub use ledger_verifier::{BalanceChange, LedgerError, LedgerTransaction, LedgerVerifier};
pub use order_store::{OrderStore, StoreError};
