//! Inbound disbursement request.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::stage::StageParams;

/// A loan-backed purchase: `quantity` units of `item` from `vendor_id`, repaid
/// from `farmer_id`'s harvest sale.
///
/// The transport layer guarantees the JSON shape; this type only checks that
/// the four required fields carry usable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub item: String,
    pub quantity: u32,
    pub vendor_id: String,
    pub farmer_id: String,
    /// When present, the run is screened by the credit risk gate first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_score: Option<u32>,
}

impl DisbursementRequest {
    pub fn new(
        item: impl Into<String>,
        quantity: u32,
        vendor_id: impl Into<String>,
        farmer_id: impl Into<String>,
    ) -> Self {
        Self {
            item: item.into(),
            quantity,
            vendor_id: vendor_id.into(),
            farmer_id: farmer_id.into(),
            credit_score: None,
        }
    }

    pub fn with_credit_score(mut self, score: u32) -> Self {
        self.credit_score = Some(score);
        self
    }

    /// Reject blank identifiers and a zero quantity.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let fields = [
            ("item", &self.item),
            ("vendor_id", &self.vendor_id),
            ("farmer_id", &self.farmer_id),
        ];
        for (param, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigurationError::MissingParameter {
                    param: param.to_string(),
                });
            }
        }
        if self.quantity == 0 {
            return Err(ConfigurationError::InvalidParameter {
                param: "quantity".to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }
        Ok(())
    }

    /// Template parameters derived from the request.
    pub fn to_params(&self) -> StageParams {
        let mut params = StageParams::new()
            .with("item", self.item.clone())
            .with("quantity", self.quantity)
            .with("vendor_id", self.vendor_id.clone())
            .with("farmer_id", self.farmer_id.clone());
        if let Some(score) = self.credit_score {
            params.insert("credit_score", score);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> DisbursementRequest {
        DisbursementRequest::new("Urea Fertilizer", 50, "V-9988", "F-1024")
    }

    #[test]
    fn test_complete_request_is_valid() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_blank_vendor_is_missing() {
        let mut req = request();
        req.vendor_id = "   ".to_string();
        assert_eq!(
            req.validate().unwrap_err(),
            ConfigurationError::MissingParameter {
                param: "vendor_id".to_string()
            }
        );
    }

    #[test]
    fn test_zero_quantity_is_invalid() {
        let mut req = request();
        req.quantity = 0;
        assert!(matches!(
            req.validate(),
            Err(ConfigurationError::InvalidParameter { param, .. }) if param == "quantity"
        ));
    }

    #[test]
    fn test_params_keep_quantity_numeric() {
        let params = request().to_params();
        assert_eq!(params.get("quantity"), Some(&json!(50)));
        assert_eq!(params.get("farmer_id"), Some(&json!("F-1024")));
        assert_eq!(params.get("credit_score"), None);

        let scored = request().with_credit_score(640).to_params();
        assert_eq!(scored.get("credit_score"), Some(&json!(640)));
    }

    #[test]
    fn test_deserializes_transport_shape() {
        let req: DisbursementRequest = serde_json::from_value(json!({
            "item": "Urea Fertilizer",
            "quantity": 50,
            "vendor_id": "V-9988",
            "farmer_id": "F-1024"
        }))
        .unwrap();
        assert_eq!(req, request());
        assert!(!serde_json::to_value(&req).unwrap().as_object().unwrap().contains_key("credit_score"));
    }
}
