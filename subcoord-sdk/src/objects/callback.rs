//! Canonical gateway callback payload.

use serde::{Deserialize, Serialize};

/// Body of a processor callback.
///
/// Unknown fields are ignored so processors can add data without breaking
/// verification or parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCallbackPayload {
    pub transaction_id: String,
    pub status: CallbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Processor-reported charge status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Success,
    Failed,
    Pending,
    /// Any status this coordinator does not understand.
    #[serde(other)]
    Unknown,
}
