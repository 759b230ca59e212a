use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use checkout_common::TokenAmount;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(String);

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
/// Lifecycle of an order. The declaration order is the forward progression; `Cancelled` sits outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// Created at checkout. No payment signal has been seen yet.
    Draft,
    /// A payment reference has been attached, but the payment is not yet confirmed.
    PendingPayment,
    /// Payment confirmed. The order is owned by the merchant from here on.
    Confirmed,
    Preparing,
    Shipped,
    /// Terminal.
    Delivered,
    /// Reachable from any non-terminal state, and reversible.
    Cancelled,
}

impl OrderStatusType {
    /// Position in the forward progression. `None` for `Cancelled`.
    pub fn rank(&self) -> Option<u8> {
        use OrderStatusType::*;
        match self {
            Draft => Some(0),
            PendingPayment => Some(1),
            Confirmed => Some(2),
            Preparing => Some(3),
            Shipped => Some(4),
            Delivered => Some(5),
            Cancelled => None,
        }
    }

    /// True for `confirmed` and every state after it.
    pub fn is_confirmed_or_later(&self) -> bool {
        self.rank().map(|r| r >= 2).unwrap_or(false)
    }

    /// True for the states the confirmation engine may move forward.
    pub fn is_awaiting_payment(&self) -> bool {
        matches!(self, OrderStatusType::Draft | OrderStatusType::PendingPayment)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatusType::Delivered)
    }

    /// The next state in the merchant fulfilment flow, if there is one.
    pub fn next_fulfilment_step(&self) -> Option<Self> {
        use OrderStatusType::*;
        match self {
            Confirmed => Some(Preparing),
            Preparing => Some(Shipped),
            Shipped => Some(Delivered),
            _ => None,
        }
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatusType::Draft => "draft",
            OrderStatusType::PendingPayment => "pending_payment",
            OrderStatusType::Confirmed => "confirmed",
            OrderStatusType::Preparing => "preparing",
            OrderStatusType::Shipped => "shipped",
            OrderStatusType::Delivered => "delivered",
            OrderStatusType::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending_payment" => Ok(Self::PendingPayment),
            "confirmed" => Ok(Self::Confirmed),
            "preparing" => Ok(Self::Preparing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

impl From<String> for OrderStatusType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to Draft");
            OrderStatusType::Draft
        })
    }
}

//--------------------------------------      PaymentRail      ---------------------------------------------------------
/// The payment mechanism an order is paid through. Recorded when the order is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    /// Card-network payment processor. References are processor charge ids.
    Card,
    /// On-chain transfer. References are transaction signatures.
    Blockchain,
    /// Free or fully discounted orders. References are promotion codes.
    Promotional,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown payment rail: {0}")]
pub struct UnknownRail(pub String);

impl Display for PaymentRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentRail::Card => f.write_str("card"),
            PaymentRail::Blockchain => f.write_str("blockchain"),
            PaymentRail::Promotional => f.write_str("promotional"),
        }
    }
}

impl FromStr for PaymentRail {
    type Err = UnknownRail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" => Ok(Self::Card),
            "blockchain" => Ok(Self::Blockchain),
            "promotional" => Ok(Self::Promotional),
            _ => Err(UnknownRail(s.to_string())),
        }
    }
}

//--------------------------------------  VerificationStatus   ---------------------------------------------------------
/// Outcome of the most recent ledger verification for a blockchain-rail order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    /// Mismatch, failed transaction, or transaction not found. Left for manual review.
    Failed,
    /// The ledger could not be reached. The order will be picked up again by the next sweep.
    Deferred,
}

impl Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationStatus::Verified => f.write_str("verified"),
            VerificationStatus::Failed => f.write_str("failed"),
            VerificationStatus::Deferred => f.write_str("deferred"),
        }
    }
}

//--------------------------------------   Identifier types    ---------------------------------------------------------
/// Human-readable, unique order number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderNumber(pub String);

impl From<&str> for OrderNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrderNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Groups the orders created by a single checkout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct BatchId(pub String);

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BatchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch[{}]", self.0)
    }
}

impl BatchId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// External identifier of a payment attempt: a processor charge id, a transaction signature, or a promotion code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct PaymentReference(pub String);

impl From<&str> for PaymentReference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PaymentReference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PaymentReference {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

//--------------------------------------    PaymentMetadata    ---------------------------------------------------------
/// How an order's payment was confirmed. Written by the confirmation engine, never by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationTier {
    /// The single conditioned status-and-reference write.
    Atomic,
    /// `draft -> pending_payment -> confirmed` as two conditioned writes.
    TwoStep,
    /// Unconditioned write. Only used when both other tiers failed.
    ForcedOverride,
}

impl Display for ConfirmationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfirmationTier::Atomic => f.write_str("atomic"),
            ConfirmationTier::TwoStep => f.write_str("two-step"),
            ConfirmationTier::ForcedOverride => f.write_str("forced override"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub status: VerificationStatus,
    pub reason: Option<String>,
    pub observed_amount: Option<TokenAmount>,
    pub observed_sender: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Free-form payment bookkeeping stored alongside the order as a JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    /// The rail the confirming caller said the payment came through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_via: Option<PaymentRail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_tier: Option<ConfirmationTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Set when a reconciliation sweep, rather than a payment signal, confirmed the order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<DateTime<Utc>>,
    /// Pending references that were replaced by a later payment attempt before confirmation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded_references: Vec<PaymentReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification: Option<VerificationRecord>,
    /// The status the order had when it was cancelled, so that the cancellation can be undone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_before_cancel: Option<OrderStatusType>,
}

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: OrderNumber,
    pub status: OrderStatusType,
    pub batch_id: Option<BatchId>,
    pub rail: Option<PaymentRail>,
    pub payment_reference: Option<PaymentReference>,
    #[sqlx(json)]
    pub payment_metadata: PaymentMetadata,
    pub amount_expected: Option<TokenAmount>,
    pub payer_identity_expected: Option<String>,
    pub verification_status: Option<VerificationStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn has_reference(&self, reference: &PaymentReference) -> bool {
        self.payment_reference.as_ref() == Some(reference)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

//--------------------------------------       NewOrder        ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub batch_id: Option<BatchId>,
    pub rail: Option<PaymentRail>,
    /// Expected transfer amount. Only meaningful for the blockchain rail.
    pub amount_expected: Option<TokenAmount>,
    /// Expected sending wallet. Only meaningful for the blockchain rail.
    pub payer_identity_expected: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new<S: Into<OrderNumber>>(order_number: S) -> Self {
        Self {
            order_number: order_number.into(),
            batch_id: None,
            rail: None,
            amount_expected: None,
            payer_identity_expected: None,
            created_at: Utc::now(),
        }
    }

    pub fn in_batch<S: Into<BatchId>>(mut self, batch_id: S) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_rail(mut self, rail: PaymentRail) -> Self {
        self.rail = Some(rail);
        self
    }

    /// Sets the blockchain-rail expectations and marks the order as a blockchain order.
    pub fn expecting_transfer<S: Into<String>>(mut self, amount: TokenAmount, payer: S) -> Self {
        self.rail = Some(PaymentRail::Blockchain);
        self.amount_expected = Some(amount);
        self.payer_identity_expected = Some(payer.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
