//! PurposePay Core Library
//!
//! A closed-loop, verification-gated disbursement pipeline. A request moves
//! through three roles in strict order (verify the price, pay the vendor,
//! recover the loan from the harvest sale) and a failure at any stage halts
//! everything after it. Requests carrying a credit score are screened by a
//! risk gate first.

pub mod cancel;
pub mod capability;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod journal;
pub mod obs;
pub mod orchestrator;
pub mod pipeline;
pub mod record;
pub mod request;
pub mod response;
pub mod role;
pub mod stage;
pub mod telemetry;
pub mod template;

pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use capability::{
    Capability, CapabilityInput, CapabilityInvocation, CapabilityRegistry, CapabilitySpec,
    EffectClass, InputSchema, InvocationOutcome, InvocationScope, ParamSpec, ParamType,
};
pub use collaborators::{
    Collaborators, CreditRiskAssessor, HarvestSaleListener, HarvestSettlement, MarketPriceVerifier,
    PaymentExecutor, PaymentReceipt,
};
pub use config::{
    CollaboratorConfig, ConfigFileError, MarketRate, OrchestratorConfig, PurposePayConfig,
};
pub use error::{
    CapabilityError, ConfigurationError, ErrorKind, InternalInvariantError, PipelineError, Result,
};
pub use journal::{FsRunJournal, JournalError, MemoryRunJournal, RunJournal};
pub use orchestrator::{
    DisbursementRoles, Orchestrator, ASSESS_STAGE, DISBURSE_STAGE, RECOVER_STAGE, VERIFY_STAGE,
};
pub use pipeline::{CompositionPolicy, Execution, ExecutionOptions, Pipeline, PipelineRun, RunStatus};
pub use record::RunRecord;
pub use request::DisbursementRequest;
pub use response::SettlementResponse;
pub use role::{Role, RoleDescriptor};
pub use stage::{
    InputBinding, Stage, StageError, StageParams, StageReport, StageResult, StageSpec, StageState,
    StageStatus,
};
pub use telemetry::{init_tracing, LogFormat};
pub use template::{InstructionTemplate, StageOutputs, StageRef};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
