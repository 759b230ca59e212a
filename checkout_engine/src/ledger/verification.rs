use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db_types::{Order, TokenAmount},
    traits::{BalanceChange, LedgerTransaction},
};

/// The largest difference between the transferred and the expected amount that still counts as a match: 0.00001
/// tokens. Wallet rounding of displayed amounts lands well inside this.
pub const DEFAULT_AMOUNT_TOLERANCE: TokenAmount = TokenAmount::from_base_units(10_000);

static SIGNATURE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{64,88}$").expect("signature pattern is a valid regex"));

/// True if the string has the shape of a base58 transaction signature. This is a sanity check on references attached
/// to blockchain-rail orders, not a way of guessing the rail.
pub fn is_plausible_signature(reference: &str) -> bool {
    SIGNATURE_PATTERN.is_match(reference)
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VerificationMismatch {
    #[error("Transaction {0} was not found on the ledger")]
    TransactionNotFound(String),
    #[error("'{0}' is not a valid transaction signature")]
    MalformedReference(String),
    #[error("The transaction failed on the ledger: {0}")]
    TransactionFailed(String),
    #[error("No transfer between two accounts was found in the transaction")]
    NoTransferFound,
    #[error("Transferred amount {observed} differs from the expected {expected} by more than {tolerance}")]
    AmountMismatch { expected: TokenAmount, observed: TokenAmount, tolerance: TokenAmount },
    #[error("Sender {observed} does not match the expected payer {expected}")]
    SenderMismatch { expected: String, observed: String },
    #[error("The transfer went to {observed}, not to the merchant wallet {expected}")]
    RecipientMismatch { expected: String, observed: String },
    #[error("The order does not record an expected amount and payer")]
    MissingExpectation,
}

/// What the order says the transfer should look like.
#[derive(Debug, Clone)]
pub struct TransferExpectation {
    pub amount: TokenAmount,
    pub payer: String,
    /// When set, the positive balance change must land in this account.
    pub recipient: Option<String>,
    pub tolerance: TokenAmount,
}

impl TransferExpectation {
    pub fn new<S: Into<String>>(amount: TokenAmount, payer: S) -> Self {
        Self { amount, payer: payer.into(), recipient: None, tolerance: DEFAULT_AMOUNT_TOLERANCE }
    }

    /// Builds the expectation from the order's blockchain-rail fields.
    pub fn for_order(order: &Order) -> Result<Self, VerificationMismatch> {
        match (order.amount_expected, order.payer_identity_expected.as_ref()) {
            (Some(amount), Some(payer)) if !payer.trim().is_empty() => Ok(Self::new(amount, payer.trim())),
            _ => Err(VerificationMismatch::MissingExpectation),
        }
    }

    pub fn with_recipient(mut self, recipient: Option<String>) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn with_tolerance(mut self, tolerance: TokenAmount) -> Self {
        self.tolerance = tolerance.abs();
        self
    }
}

/// The transfer that was found in a transaction and matched the expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedTransfer {
    pub sender: String,
    pub recipient: String,
    pub amount: TokenAmount,
}

/// Checks a finalized ledger transaction against what the order expected.
///
/// The transaction must have executed without error, and contain a positive balance change (the recipient) matched by
/// a negative one at least as large (the sender, who also pays the network fee). The received amount must be within
/// the tolerance of the expected amount, and the sender must be the expected payer, compared case-insensitively.
pub fn verify_transfer(
    tx: &LedgerTransaction,
    expected: &TransferExpectation,
) -> Result<VerifiedTransfer, VerificationMismatch> {
    if let Some(err) = &tx.error {
        return Err(VerificationMismatch::TransactionFailed(err.clone()));
    }
    let recipient = find_recipient(&tx.balance_changes, expected.recipient.as_deref())?;
    let sender = tx
        .balance_changes
        .iter()
        .filter(|c| c.delta.is_negative() && c.account != recipient.account)
        .min_by_key(|c| c.delta)
        .ok_or(VerificationMismatch::NoTransferFound)?;
    if sender.delta.abs() < recipient.delta {
        return Err(VerificationMismatch::NoTransferFound);
    }
    let observed = recipient.delta;
    if observed.abs_diff(&expected.amount) > expected.tolerance {
        return Err(VerificationMismatch::AmountMismatch {
            expected: expected.amount,
            observed,
            tolerance: expected.tolerance,
        });
    }
    if !sender.account.eq_ignore_ascii_case(expected.payer.trim()) {
        return Err(VerificationMismatch::SenderMismatch {
            expected: expected.payer.clone(),
            observed: sender.account.clone(),
        });
    }
    Ok(VerifiedTransfer { sender: sender.account.clone(), recipient: recipient.account.clone(), amount: observed })
}

fn find_recipient<'a>(
    changes: &'a [BalanceChange],
    merchant: Option<&str>,
) -> Result<&'a BalanceChange, VerificationMismatch> {
    let largest_credit =
        changes.iter().filter(|c| c.delta.is_positive()).max_by_key(|c| c.delta).ok_or(VerificationMismatch::NoTransferFound)?;
    match merchant {
        None => Ok(largest_credit),
        Some(wallet) => changes
            .iter()
            .find(|c| c.delta.is_positive() && c.account.eq_ignore_ascii_case(wallet))
            .ok_or_else(|| VerificationMismatch::RecipientMismatch {
                expected: wallet.to_string(),
                observed: largest_credit.account.clone(),
            }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PAYER: &str = "PayerWa11etPayerWa11etPayerWa11et";
    const SHOP: &str = "ShopWa11etShopWa11etShopWa11etShop";

    fn ledger_tx(changes: Vec<(&str, i64)>) -> LedgerTransaction {
        LedgerTransaction {
            signature: "sig".into(),
            error: None,
            balance_changes: changes.into_iter().map(|(a, d)| BalanceChange::new(a, TokenAmount::from(d))).collect(),
        }
    }

    fn expect(amount: i64) -> TransferExpectation {
        TransferExpectation::new(TokenAmount::from(amount), PAYER)
    }

    #[test]
    fn exact_transfer_verifies() {
        let tx = ledger_tx(vec![(PAYER, -1_500_005_000), (SHOP, 1_500_000_000), ("Fees111", 0)]);
        let verified = verify_transfer(&tx, &expect(1_500_000_000)).unwrap();
        assert_eq!(verified.sender, PAYER);
        assert_eq!(verified.recipient, SHOP);
        assert_eq!(verified.amount, TokenAmount::from(1_500_000_000));
    }

    #[test]
    fn amount_within_tolerance_verifies() {
        let tx = ledger_tx(vec![(PAYER, -1_500_005_000), (SHOP, 1_499_995_000)]);
        assert!(verify_transfer(&tx, &expect(1_500_000_000)).is_ok());
        let tx = tx_with_credit(1_500_010_000);
        assert!(verify_transfer(&tx, &expect(1_500_000_000)).is_ok());
    }

    fn tx_with_credit(credit: i64) -> LedgerTransaction {
        ledger_tx(vec![(PAYER, -(credit + 5_000)), (SHOP, credit)])
    }

    #[test]
    fn amount_outside_tolerance_is_a_mismatch() {
        let tx = tx_with_credit(1_500_010_001);
        let err = verify_transfer(&tx, &expect(1_500_000_000)).unwrap_err();
        assert!(matches!(err, VerificationMismatch::AmountMismatch { .. }));
        let tx = tx_with_credit(1_000_000_000);
        let err = verify_transfer(&tx, &expect(1_500_000_000)).unwrap_err();
        assert!(matches!(err, VerificationMismatch::AmountMismatch { .. }));
    }

    #[test]
    fn sender_match_ignores_case() {
        let tx = ledger_tx(vec![(&PAYER.to_lowercase(), -1_000_005_000), (SHOP, 1_000_000_000)]);
        assert!(verify_transfer(&tx, &expect(1_000_000_000)).is_ok());
    }

    #[test]
    fn wrong_sender_is_a_mismatch() {
        let tx = ledger_tx(vec![("SomeoneElse", -1_000_005_000), (SHOP, 1_000_000_000)]);
        let err = verify_transfer(&tx, &expect(1_000_000_000)).unwrap_err();
        assert_eq!(err, VerificationMismatch::SenderMismatch {
            expected: PAYER.to_string(),
            observed: "SomeoneElse".to_string()
        });
    }

    #[test]
    fn failed_transactions_never_verify() {
        let mut tx = tx_with_credit(1_000_000_000);
        tx.error = Some("InstructionError(0, InsufficientFunds)".into());
        let err = verify_transfer(&tx, &expect(1_000_000_000)).unwrap_err();
        assert!(matches!(err, VerificationMismatch::TransactionFailed(_)));
    }

    #[test]
    fn credit_without_matching_debit_is_not_a_transfer() {
        let tx = ledger_tx(vec![(PAYER, -5_000), (SHOP, 1_000_000_000)]);
        assert_eq!(verify_transfer(&tx, &expect(1_000_000_000)), Err(VerificationMismatch::NoTransferFound));
        let tx = ledger_tx(vec![(PAYER, -5_000)]);
        assert_eq!(verify_transfer(&tx, &expect(1_000_000_000)), Err(VerificationMismatch::NoTransferFound));
    }

    #[test]
    fn merchant_wallet_is_enforced_when_configured() {
        let tx = tx_with_credit(1_000_000_000);
        let ok = expect(1_000_000_000).with_recipient(Some(SHOP.to_lowercase()));
        assert!(verify_transfer(&tx, &ok).is_ok());
        let wrong = expect(1_000_000_000).with_recipient(Some("AnotherShop".into()));
        assert!(matches!(verify_transfer(&tx, &wrong), Err(VerificationMismatch::RecipientMismatch { .. })));
    }

    #[test]
    fn signature_shape() {
        let sig = "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";
        assert!(is_plausible_signature(sig));
        assert!(!is_plausible_signature("ch_3NkPqR2eZvKYlo2C1a2b3c4d"));
        assert!(!is_plausible_signature(&sig.replace('5', "0")));
        assert!(!is_plausible_signature(""));
    }
}
