//! Stand-in collaborators behind the disbursement capabilities.
//!
//! These model the external systems (credit bureau, market-data feed,
//! payment rail, marketplace) with in-process logic driven by [`CollaboratorConfig`]. They
//! are reached only through the [`Capability`] trait, so a production
//! integration replaces them without touching the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::capability::{
    Capability, CapabilityInput, CapabilityRegistry, CapabilitySpec, EffectClass, InputSchema,
    ParamSpec, ParamType,
};
use crate::config::CollaboratorConfig;
use crate::error::ConfigurationError;

pub const MARKET_PRICE_VERIFIER: &str = "market_price_verifier";
pub const PAYMENT_EXECUTOR: &str = "payment_executor";
pub const HARVEST_SALE_LISTENER: &str = "harvest_sale_listener";
pub const CREDIT_RISK_ASSESSOR: &str = "credit_risk_assessor";

fn str_field<'a>(input: &'a CapabilityInput, name: &str) -> Result<&'a str, String> {
    input
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("'{name}' must be a string"))
}

fn amount_field(input: &CapabilityInput, name: &str) -> Result<Option<u64>, String> {
    match input.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("'{name}' must be a non-negative whole amount")),
    }
}

// ---------------------------------------------------------------------------
// Market price verification
// ---------------------------------------------------------------------------

/// Checks a requested item against the configured market price table.
pub struct MarketPriceVerifier {
    spec: CapabilitySpec,
    config: CollaboratorConfig,
}

impl MarketPriceVerifier {
    pub fn new(config: CollaboratorConfig) -> Self {
        Self {
            spec: CapabilitySpec {
                name: MARKET_PRICE_VERIFIER.to_string(),
                description: "Checks the current market price of an agricultural input"
                    .to_string(),
                input_schema: InputSchema::new(vec![
                    ParamSpec::required("item", ParamType::String),
                    ParamSpec::optional("quantity", ParamType::Integer),
                ]),
                effect: EffectClass::SideEffectFree,
            },
            config,
        }
    }

    fn market_rate(&self, item: &str) -> Option<(&str, u64)> {
        self.config
            .market_rate(item)
            .map(|row| (row.item.as_str(), row.rate))
    }
}

#[async_trait]
impl Capability for MarketPriceVerifier {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn call(&self, input: &CapabilityInput) -> Result<Value, String> {
        let item = str_field(input, "item")?;
        let quantity = amount_field(input, "quantity")?.unwrap_or(1);

        let (matched, unit_price, rate_source, verdict) = match self.market_rate(item) {
            Some((keyword, rate)) => (
                Some(keyword),
                rate,
                "market",
                format!("Verified Price for {keyword}: \u{20b9}{rate}/bag. Market Rate Confirmed."),
            ),
            None if self.config.require_market_rate => {
                return Err(format!("no market rate available for '{item}'"));
            }
            None => (
                None,
                self.config.standard_rate,
                "standard",
                format!(
                    "Price verification failed for {item}. Using Standard Rate \u{20b9}{}/unit.",
                    self.config.standard_rate
                ),
            ),
        };

        let total_amount = unit_price
            .checked_mul(quantity)
            .ok_or_else(|| format!("order total overflows for {quantity} x {unit_price}"))?;

        Ok(json!({
            "item": item,
            "matched": matched,
            "unit_price": unit_price,
            "quantity": quantity,
            "total_amount": total_amount,
            "rate_source": rate_source,
            "summary": format!(
                "{verdict} Purchase order: {quantity} x \u{20b9}{unit_price} = \u{20b9}{total_amount}."
            ),
        }))
    }
}

// ---------------------------------------------------------------------------
// Payment execution
// ---------------------------------------------------------------------------

/// Receipt for one vendor payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub receipt_id: String,
    /// Code the vendor redeems to release the goods.
    pub voucher_code: String,
    pub amount: u64,
    pub vendor_id: String,
    pub issued_at: DateTime<Utc>,
}

/// Pays vendors directly; never the borrower. Every successful call issues
/// exactly one receipt.
pub struct PaymentExecutor {
    spec: CapabilitySpec,
    receipt_prefix: String,
    receipts: Mutex<Vec<PaymentReceipt>>,
}

impl PaymentExecutor {
    pub fn new(receipt_prefix: impl Into<String>) -> Self {
        Self {
            spec: CapabilitySpec {
                name: PAYMENT_EXECUTOR.to_string(),
                description: "Executes a UPI transfer to the vendor".to_string(),
                input_schema: InputSchema::new(vec![
                    ParamSpec::required("amount", ParamType::Integer),
                    ParamSpec::required("vendor_id", ParamType::String),
                ]),
                effect: EffectClass::AtMostOnce,
            },
            receipt_prefix: receipt_prefix.into(),
            receipts: Mutex::new(Vec::new()),
        }
    }

    /// Every receipt issued so far, oldest first.
    pub async fn receipts(&self) -> Vec<PaymentReceipt> {
        self.receipts.lock().await.clone()
    }
}

#[async_trait]
impl Capability for PaymentExecutor {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn call(&self, input: &CapabilityInput) -> Result<Value, String> {
        let vendor_id = str_field(input, "vendor_id")?;
        let amount = match amount_field(input, "amount")? {
            Some(a) if a > 0 => a,
            _ => return Err("payment amount must be positive".to_string()),
        };

        let id = Uuid::new_v4();
        let simple = id.simple().to_string();
        let receipt = PaymentReceipt {
            receipt_id: format!("{}_{}", self.receipt_prefix, &simple[..12]),
            voucher_code: format!("AGRO-{}", 1000 + id.as_u128() % 9000),
            amount,
            vendor_id: vendor_id.to_string(),
            issued_at: Utc::now(),
        };
        self.receipts.lock().await.push(receipt.clone());

        Ok(json!({
            "receipt_id": receipt.receipt_id,
            "voucher_code": receipt.voucher_code,
            "amount": amount,
            "vendor_id": vendor_id,
            "summary": format!(
                "Transaction Successful: Paid \u{20b9}{amount} to Vendor ID {vendor_id}. TxHash: #{}.",
                receipt.receipt_id
            ),
        }))
    }
}

// ---------------------------------------------------------------------------
// Harvest sale recovery
// ---------------------------------------------------------------------------

/// Loan recovery applied to one harvest sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSettlement {
    pub farmer_id: String,
    pub sale_amount: u64,
    pub loan_deduction: u64,
    pub net_disbursed: u64,
    pub outstanding: u64,
}

/// Intercepts a farmer's harvest sale and deducts the outstanding loan before
/// releasing the remainder.
pub struct HarvestSaleListener {
    spec: CapabilitySpec,
    sale_amount: u64,
    settlements: Mutex<Vec<HarvestSettlement>>,
}

impl HarvestSaleListener {
    pub fn new(sale_amount: u64) -> Self {
        Self {
            spec: CapabilitySpec {
                name: HARVEST_SALE_LISTENER.to_string(),
                description: "Detects a harvest sale and deducts the loan amount".to_string(),
                input_schema: InputSchema::new(vec![
                    ParamSpec::required("farmer_id", ParamType::String),
                    ParamSpec::optional("loan_amount", ParamType::Integer),
                ]),
                effect: EffectClass::AtMostOnce,
            },
            sale_amount,
            settlements: Mutex::new(Vec::new()),
        }
    }

    pub async fn settlements(&self) -> Vec<HarvestSettlement> {
        self.settlements.lock().await.clone()
    }
}

#[async_trait]
impl Capability for HarvestSaleListener {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn call(&self, input: &CapabilityInput) -> Result<Value, String> {
        let farmer_id = str_field(input, "farmer_id")?;
        let loan = amount_field(input, "loan_amount")?.unwrap_or(0);

        let loan_deduction = loan.min(self.sale_amount);
        let settlement = HarvestSettlement {
            farmer_id: farmer_id.to_string(),
            sale_amount: self.sale_amount,
            loan_deduction,
            net_disbursed: self.sale_amount - loan_deduction,
            outstanding: loan - loan_deduction,
        };
        self.settlements.lock().await.push(settlement.clone());

        Ok(json!({
            "farmer_id": settlement.farmer_id,
            "sale_amount": settlement.sale_amount,
            "loan_deduction": settlement.loan_deduction,
            "net_disbursed": settlement.net_disbursed,
            "outstanding": settlement.outstanding,
            "summary": format!(
                "Harvest Sale Detected for Farmer {farmer_id}: \u{20b9}{}. Deducted Loan: \u{20b9}{}. Net Disbursed: \u{20b9}{}.",
                settlement.sale_amount, settlement.loan_deduction, settlement.net_disbursed
            ),
        }))
    }
}

// ---------------------------------------------------------------------------
// Credit risk assessment
// ---------------------------------------------------------------------------

/// Screens a borrower's credit score before any purchase is verified.
///
/// The purpose-bound loop exists for borrowers the traditional channel turns
/// away, so a score below the threshold is the passing outcome. A score at or
/// above it is refused here: that loan belongs on the traditional channel and
/// nothing downstream runs.
pub struct CreditRiskAssessor {
    spec: CapabilitySpec,
    min_credit_score: u32,
}

impl CreditRiskAssessor {
    pub fn new(min_credit_score: u32) -> Self {
        Self {
            spec: CapabilitySpec {
                name: CREDIT_RISK_ASSESSOR.to_string(),
                description: "Assesses borrower credit risk against the lending threshold"
                    .to_string(),
                input_schema: InputSchema::new(vec![
                    ParamSpec::required("farmer_id", ParamType::String),
                    ParamSpec::required("credit_score", ParamType::Integer),
                ]),
                effect: EffectClass::SideEffectFree,
            },
            min_credit_score,
        }
    }
}

#[async_trait]
impl Capability for CreditRiskAssessor {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn call(&self, input: &CapabilityInput) -> Result<Value, String> {
        let farmer_id = str_field(input, "farmer_id")?;
        let score = amount_field(input, "credit_score")?
            .ok_or_else(|| "'credit_score' is required".to_string())?;
        let threshold = u64::from(self.min_credit_score);

        if score >= threshold {
            return Err(format!(
                "credit score {score} meets the {threshold} threshold; loan approved via traditional channel, purpose-bound disbursement not triggered"
            ));
        }

        Ok(json!({
            "farmer_id": farmer_id,
            "credit_score": score,
            "threshold": threshold,
            "risk": "high",
            "agent_triggered": true,
            "summary": format!(
                "Credit score {score} for Farmer {farmer_id} is below {threshold}. Traditional lending criteria not met; purpose-bound disbursement authorised."
            ),
        }))
    }
}

/// The bundled collaborators, kept addressable for inspection.
#[derive(Clone)]
pub struct Collaborators {
    pub verifier: Arc<MarketPriceVerifier>,
    pub payments: Arc<PaymentExecutor>,
    pub harvest: Arc<HarvestSaleListener>,
    pub risk: Arc<CreditRiskAssessor>,
}

impl Collaborators {
    pub fn from_config(config: &CollaboratorConfig) -> Self {
        Self {
            verifier: Arc::new(MarketPriceVerifier::new(config.clone())),
            payments: Arc::new(PaymentExecutor::new(config.receipt_prefix.clone())),
            harvest: Arc::new(HarvestSaleListener::new(config.harvest_sale_amount)),
            risk: Arc::new(CreditRiskAssessor::new(config.min_credit_score)),
        }
    }

    pub fn registry(&self) -> Result<CapabilityRegistry, ConfigurationError> {
        let mut registry = CapabilityRegistry::new();
        registry.register(self.verifier.clone())?;
        registry.register(self.payments.clone())?;
        registry.register(self.harvest.clone())?;
        registry.register(self.risk.clone())?;
        Ok(registry)
    }
}
