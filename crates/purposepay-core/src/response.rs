//! Outbound settlement payload handed to the transport layer.

use serde::{Deserialize, Serialize};

/// `{"status":"success","result":..,"logs":[..]}` or
/// `{"status":"error","message":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementResponse {
    Success { result: String, logs: Vec<String> },
    Error { message: String },
}

impl SettlementResponse {
    pub fn error(message: impl Into<String>) -> Self {
        SettlementResponse::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SettlementResponse::Success { .. })
    }
}
