use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::TokenAmount;

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("The ledger lookup timed out after {0}ms")]
    Timeout(u64),
    #[error("The ledger node is unavailable: {0}")]
    Unavailable(String),
    #[error("The ledger node returned an error: {0}")]
    NodeError(String),
    #[error("Could not interpret the ledger response: {0}")]
    MalformedResponse(String),
}

impl LedgerError {
    /// Timeouts and connectivity problems are worth another attempt. Everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Timeout(_) | LedgerError::Unavailable(_))
    }
}

/// The net change of one account's balance caused by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub account: String,
    pub delta: TokenAmount,
}

impl BalanceChange {
    pub fn new<S: Into<String>>(account: S, delta: TokenAmount) -> Self {
        Self { account: account.into(), delta }
    }
}

/// The parts of a finalized ledger transaction that payment verification cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub signature: String,
    /// The execution error reported by the ledger, if the transaction failed.
    pub error: Option<String>,
    pub balance_changes: Vec<BalanceChange>,
}

/// Read-only access to the blockchain rail.
#[allow(async_fn_in_trait)]
pub trait LedgerVerifier {
    /// Looks up a *finalized* transaction by its signature. Returns `Ok(None)` if the ledger does not know about it.
    ///
    /// Implementations must bound the lookup with a timeout and report it as [`LedgerError::Timeout`].
    async fn fetch_transaction(&self, signature: &str) -> Result<Option<LedgerTransaction>, LedgerError>;
}
