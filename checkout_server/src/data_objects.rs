use serde::{Deserialize, Serialize};

/// A payment signal for an order or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    /// An order number, an internal order id, or a batch id.
    pub target: String,
    pub payment_reference: String,
    /// The rail the payment came through, if the caller knows it.
    #[serde(default)]
    pub rail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmBatchRequest {
    pub batch_id: String,
    pub payment_reference: String,
}

/// Optional overrides for a manually triggered sweep. Anything left out uses the configured value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepParams {
    pub max_age_hours: Option<i64>,
    pub limit: Option<u32>,
}
