//! Orchestrator: turns a disbursement request into a verified, paid, and
//! recovered settlement.
//!
//! The pipeline is fixed:
//!
//! | stage      | role                          | capability              |
//! |------------|-------------------------------|-------------------------|
//! | `verify`   | The Broker (Verification)     | `market_price_verifier` |
//! | `disburse` | The Escrow (Transaction)      | `payment_executor`      |
//! | `recover`  | The Recovery (Deduction)      | `harvest_sale_listener` |
//!
//! A request that carries a credit score is first screened by an `assess`
//! stage (The Underwriter (Risk), `credit_risk_assessor`). Only borrowers the
//! traditional channel would refuse continue to verification.
//!
//! Each `run` builds fresh stages from the request and shares nothing mutable
//! with other runs except the role/capability registry.

use std::sync::Arc;

use chrono::Utc;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::capability::CapabilityRegistry;
use crate::collaborators::{
    Collaborators, CREDIT_RISK_ASSESSOR, HARVEST_SALE_LISTENER, MARKET_PRICE_VERIFIER,
    PAYMENT_EXECUTOR,
};
use crate::config::{OrchestratorConfig, PurposePayConfig};
use crate::error::ConfigurationError;
use crate::journal::RunJournal;
use crate::obs;
use crate::pipeline::{ExecutionOptions, Pipeline, RunStatus};
use crate::record::RunRecord;
use crate::request::DisbursementRequest;
use crate::response::SettlementResponse;
use crate::role::Role;
use crate::stage::{InputBinding, StageSpec, StageStatus};
use crate::template::StageRef;

pub const ASSESS_STAGE: &str = "assess";
pub const VERIFY_STAGE: &str = "verify";
pub const DISBURSE_STAGE: &str = "disburse";
pub const RECOVER_STAGE: &str = "recover";

/// The roles of the disbursement loop.
#[derive(Debug, Clone)]
pub struct DisbursementRoles {
    pub verifier: Arc<Role>,
    pub disburser: Arc<Role>,
    pub recoverer: Arc<Role>,
    /// Present only when the registry offers a credit risk assessor.
    pub assessor: Option<Arc<Role>>,
}

impl DisbursementRoles {
    /// Bind each role to its capability in `registry`. The three loop roles
    /// are mandatory; the risk assessor is bound when registered.
    pub fn bind(registry: &CapabilityRegistry) -> Result<Self, ConfigurationError> {
        Ok(Self {
            verifier: Arc::new(Role::bind(
                "verifier",
                "The Broker (Verification)",
                "Verify the market price of the requested item to prevent invoice inflation.",
                registry,
                MARKET_PRICE_VERIFIER,
            )?),
            disburser: Arc::new(Role::bind(
                "disburser",
                "The Escrow (Transaction)",
                "Execute secure payments directly to vendors upon verification.",
                registry,
                PAYMENT_EXECUTOR,
            )?),
            recoverer: Arc::new(Role::bind(
                "recoverer",
                "The Recovery (Deduction)",
                "Automate loan repayment from future harvest sales.",
                registry,
                HARVEST_SALE_LISTENER,
            )?),
            assessor: registry.get(CREDIT_RISK_ASSESSOR).map(|capability| {
                Arc::new(Role::new(
                    "assessor",
                    "The Underwriter (Risk)",
                    "Screen the borrower's credit risk before any purchase is verified.",
                    capability,
                ))
            }),
        })
    }
}

/// Entry point for disbursement runs.
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    roles: DisbursementRoles,
    journal: Option<Arc<dyn RunJournal>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("roles", &self.roles)
            .field("journal", &self.journal.is_some())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: &CapabilityRegistry,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            roles: DisbursementRoles::bind(registry)?,
            journal: None,
        })
    }

    /// Build an orchestrator over the bundled stand-in collaborators.
    ///
    /// The collaborators are returned alongside so callers can inspect
    /// receipts and settlements.
    pub fn from_config(config: &PurposePayConfig) -> Result<(Self, Collaborators), ConfigurationError> {
        config.validate()?;
        let collaborators = Collaborators::from_config(&config.collaborators);
        let registry = collaborators.registry()?;
        let orchestrator = Self::new(config.orchestrator.clone(), &registry)?;
        Ok((orchestrator, collaborators))
    }

    /// Journal every completed run to `journal`.
    pub fn with_journal(mut self, journal: Arc<dyn RunJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn roles(&self) -> &DisbursementRoles {
        &self.roles
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn assess_spec(&self, request: &DisbursementRequest) -> Result<Option<StageSpec>, ConfigurationError> {
        if request.credit_score.is_none() {
            return Ok(None);
        }
        let assessor = self
            .roles
            .assessor
            .clone()
            .ok_or_else(|| ConfigurationError::UnknownCapability {
                name: CREDIT_RISK_ASSESSOR.to_string(),
            })?;
        Ok(Some(
            StageSpec::new(ASSESS_STAGE, assessor)
                .instructions(
                    "Assess the credit risk of Farmer {farmer_id} with credit score {credit_score}. \
                     Authorise purpose-bound disbursement only if traditional lending criteria are not met.",
                )
                .expected_output("A risk decision stating whether the agentic protocol is triggered.")
                .input("farmer_id", InputBinding::Request("farmer_id".to_string()))
                .input("credit_score", InputBinding::Request("credit_score".to_string())),
        ))
    }

    fn stage_specs(&self) -> Vec<StageSpec> {
        vec![
            StageSpec::new(VERIFY_STAGE, self.roles.verifier.clone())
                .instructions(
                    "Analyze the request to purchase {quantity} of {item} from Vendor {vendor_id}. \
                     Confirm the price is fair against current market rates. \
                     If verified, create a purchase order.",
                )
                .expected_output(
                    "A verified purchase order summary including the Total Amount and Verification Status.",
                )
                .input("item", InputBinding::Request("item".to_string()))
                .input("quantity", InputBinding::Request("quantity".to_string())),
            StageSpec::new(DISBURSE_STAGE, self.roles.disburser.clone())
                .instructions(
                    "Take the verified purchase order: {stage:verify/summary} \
                     Transfer exactly \u{20b9}{stage:verify/total_amount} to Vendor {vendor_id}. \
                     Ensure no funds are sent to the borrower.",
                )
                .expected_output("A payment confirmation receipt with Transaction ID.")
                .input(
                    "amount",
                    InputBinding::StageOutput(StageRef::field(VERIFY_STAGE, "/total_amount")),
                )
                .input("vendor_id", InputBinding::Request("vendor_id".to_string())),
            StageSpec::new(RECOVER_STAGE, self.roles.recoverer.clone())
                .instructions(
                    "Monitor the marketplace for sales by Farmer {farmer_id}. \
                     When a sale occurs, deduct the \u{20b9}{stage:disburse/amount} loan immediately.",
                )
                .expected_output(
                    "A final settlement statement showing Total Sale, Deductions, and Net Profit.",
                )
                .input("farmer_id", InputBinding::Request("farmer_id".to_string()))
                .input(
                    "loan_amount",
                    InputBinding::StageOutput(StageRef::field(DISBURSE_STAGE, "/amount")),
                ),
        ]
    }

    /// Validate `request` and assemble its pipeline without running it.
    pub fn build_pipeline(&self, request: &DisbursementRequest) -> Result<Pipeline, ConfigurationError> {
        request.validate()?;
        let params = request.to_params();
        let stages = self
            .assess_spec(request)?
            .into_iter()
            .chain(self.stage_specs())
            .map(|spec| spec.build(&params))
            .collect::<Result<Vec<_>, _>>()?;
        Pipeline::assemble(stages)
    }

    /// Execute one run.
    ///
    /// Configuration errors are returned before any capability is dispatched;
    /// everything after that is recorded in the returned [`RunRecord`].
    pub async fn run(&self, request: DisbursementRequest) -> Result<RunRecord, ConfigurationError> {
        self.run_with_cancel(request, CancelSignal::never()).await
    }

    /// Execute one run that stops at the next stage boundary once `cancel`
    /// fires.
    pub async fn run_with_cancel(
        &self,
        request: DisbursementRequest,
        cancel: CancelSignal,
    ) -> Result<RunRecord, ConfigurationError> {
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string());
        self.execute(run_id, request, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        request: DisbursementRequest,
        cancel: CancelSignal,
    ) -> Result<RunRecord, ConfigurationError> {
        let pipeline = self.build_pipeline(&request).inspect_err(|err| {
            warn!(run_id = %run_id, error = %err, "request rejected before dispatch");
        })?;
        let run_key = run_id.to_string();

        let started_at = Utc::now();
        obs::emit_run_started(&run_key, pipeline.len());

        let options = ExecutionOptions {
            capability_timeout: self.config.capability_timeout(),
            cancel,
        };
        let outcome = pipeline.execute(options).await;

        if outcome.status == RunStatus::Cancelled {
            let next = outcome
                .stages
                .iter()
                .find(|s| s.status() == StageStatus::Pending)
                .map(|s| s.stage_id.as_str())
                .unwrap_or("-");
            obs::emit_run_cancelled(&run_key, next);
        }

        let record = RunRecord {
            run_id,
            request,
            stages: outcome.stages,
            overall_status: outcome.status,
            first_failure: outcome.first_failure,
            started_at,
            finished_at: Utc::now(),
        };
        obs::emit_run_finished(
            &run_key,
            &record.overall_status.to_string(),
            record.duration_ms(),
        );

        if let Some(journal) = &self.journal {
            if let Err(err) = journal.append(&record).await {
                obs::emit_journal_error(&run_key, &err);
            }
        }

        Ok(record)
    }

    /// Run and convert the outcome into the outbound payload. Never fails.
    pub async fn settle(&self, request: DisbursementRequest) -> SettlementResponse {
        match self.run(request).await {
            Ok(record) => record.to_response(),
            Err(err) => SettlementResponse::error(format!("configuration error: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryRunJournal;

    fn orchestrator() -> (Orchestrator, Collaborators) {
        Orchestrator::from_config(&PurposePayConfig::default()).unwrap()
    }

    fn request() -> DisbursementRequest {
        DisbursementRequest::new("Urea Fertilizer", 50, "V-9988", "F-1024")
    }

    #[test]
    fn test_pipeline_has_three_ordered_stages() {
        let (orch, _) = orchestrator();
        let pipeline = orch.build_pipeline(&request()).unwrap();
        let ids: Vec<&str> = pipeline.stages().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![VERIFY_STAGE, DISBURSE_STAGE, RECOVER_STAGE]);
        assert_eq!(pipeline.stages()[2].dependencies(), vec![DISBURSE_STAGE]);
    }

    #[test]
    fn test_credit_score_adds_leading_assess_stage() {
        let (orch, _) = orchestrator();
        assert!(orch.roles().assessor.is_some());

        let pipeline = orch.build_pipeline(&request().with_credit_score(640)).unwrap();
        let ids: Vec<&str> = pipeline.stages().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![ASSESS_STAGE, VERIFY_STAGE, DISBURSE_STAGE, RECOVER_STAGE]);
        assert!(pipeline.stages()[0].dependencies().is_empty());
    }

    #[test]
    fn test_credit_score_without_assessor_is_configuration_error() {
        let collaborators = Collaborators::from_config(&crate::config::CollaboratorConfig::default());
        let mut registry = CapabilityRegistry::new();
        registry.register(collaborators.verifier.clone()).unwrap();
        registry.register(collaborators.payments.clone()).unwrap();
        registry.register(collaborators.harvest.clone()).unwrap();

        let orch = Orchestrator::new(OrchestratorConfig::default(), &registry).unwrap();
        assert!(orch.roles().assessor.is_none());
        assert!(orch.build_pipeline(&request()).is_ok());
        assert_eq!(
            orch.build_pipeline(&request().with_credit_score(640)).unwrap_err(),
            ConfigurationError::UnknownCapability {
                name: CREDIT_RISK_ASSESSOR.to_string()
            }
        );
    }

    #[test]
    fn test_missing_registry_entry_is_unknown_capability() {
        let err = Orchestrator::new(OrchestratorConfig::default(), &CapabilityRegistry::new())
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownCapability {
                name: MARKET_PRICE_VERIFIER.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_run_threads_amounts_through_stages() {
        let (orch, collaborators) = orchestrator();
        let record = orch.run(request()).await.unwrap();

        assert_eq!(record.overall_status, RunStatus::Succeeded);
        let recover = record.stage(RECOVER_STAGE).unwrap().result().unwrap();
        assert_eq!(recover.output["loan_deduction"], 30_000);
        assert_eq!(recover.output["net_disbursed"], 20_000);
        assert_eq!(collaborators.payments.receipts().await[0].amount, 30_000);
    }

    #[tokio::test]
    async fn test_settle_reports_configuration_error() {
        let (orch, collaborators) = orchestrator();
        let mut req = request();
        req.farmer_id.clear();

        let response = orch.settle(req).await;
        assert_eq!(
            response,
            SettlementResponse::error("configuration error: missing required parameter 'farmer_id'")
        );
        assert!(collaborators.payments.receipts().await.is_empty());
    }

    #[tokio::test]
    async fn test_completed_runs_are_journaled() {
        let journal = Arc::new(MemoryRunJournal::new());
        let (orch, _) = orchestrator();
        let orch = orch.with_journal(journal.clone());

        let record = orch.run(request()).await.unwrap();
        assert_eq!(journal.get(record.run_id).await.unwrap(), record);
        assert!(record.finished_at >= record.started_at);
        assert_eq!(
            record.duration_ms(),
            (record.finished_at - record.started_at).num_milliseconds() as u64
        );
    }
}
