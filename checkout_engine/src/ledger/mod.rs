//! # Blockchain rail verification
//!
//! [`RpcLedgerClient`] fetches finalized transactions from a JSON-RPC ledger node. [`verify_transfer`] decides whether
//! such a transaction is the payment an order was waiting for. The two are kept apart so that the matching rules can be
//! exercised without a node.
mod rpc_client;
mod verification;

pub use rpc_client::{parse_rpc_response, RpcLedgerClient, DEFAULT_LEDGER_TIMEOUT};
pub use verification::{
    is_plausible_signature,
    verify_transfer,
    TransferExpectation,
    VerificationMismatch,
    VerifiedTransfer,
    DEFAULT_AMOUNT_TOLERANCE,
};
