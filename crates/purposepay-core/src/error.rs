//! Error taxonomy for the disbursement pipeline.
//!
//! Three families, each with a distinct propagation rule:
//! - [`ConfigurationError`]: bad request parameters or stage wiring. Fatal to the
//!   run and never retried internally.
//! - [`CapabilityError`]: anything that goes wrong while a stage dispatches its
//!   role's capability. Halts the pipeline at the current stage.
//! - [`InternalInvariantError`]: an engine defect such as out-of-order dispatch.
//!   Aborts the run.

use serde::{Deserialize, Serialize};

/// Missing or invalid request parameters and unresolvable stage wiring.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("missing required parameter '{param}'")]
    MissingParameter { param: String },

    #[error("invalid parameter '{param}': {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("stage '{stage}' depends on '{depends_on}', which has not succeeded before it")]
    UnresolvedDependency { stage: String, depends_on: String },

    #[error("duplicate stage id '{stage}'")]
    DuplicateStage { stage: String },

    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("unknown capability '{name}'")]
    UnknownCapability { name: String },

    #[error("duplicate capability registration: {name}")]
    DuplicateCapability { name: String },
}

/// Failures raised by the capability dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("invalid input for capability '{capability}': parameter '{param}' {reason}")]
    InvalidInput {
        capability: String,
        param: String,
        reason: String,
    },

    #[error("capability '{capability}' is at-most-once and was already invoked in this stage")]
    AlreadyInvoked { capability: String },

    #[error("role '{role}' is not permitted to invoke capability '{capability}'")]
    NotPermitted { role: String, capability: String },

    #[error("capability '{capability}' failed: {message}")]
    Collaborator { capability: String, message: String },

    #[error("capability '{capability}' timed out after {timeout_ms}ms")]
    Timeout { capability: String, timeout_ms: u64 },

    #[error("capability '{capability}' was cancelled before it resolved")]
    Cancelled { capability: String },
}

/// Engine defects. Seeing one of these means the pipeline itself is wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalInvariantError {
    #[error("stage '{stage}' dispatched out of order: expected position {expected}, got {actual}")]
    OutOfOrderDispatch {
        stage: String,
        expected: usize,
        actual: usize,
    },

    #[error("stage '{stage}' is already terminal ({status}) and cannot be re-entered")]
    TerminalReentry { stage: String, status: String },

    #[error("stage '{stage}' dispatched after the pipeline halted")]
    DispatchAfterHalt { stage: String },

    #[error("no stage at position {position}")]
    NoSuchStage { position: usize },

    #[error("stage '{stage}' cannot move from {from} to {to}")]
    IllegalTransition {
        stage: String,
        from: String,
        to: String,
    },
}

/// Umbrella error for pipeline operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("internal invariant violated: {0}")]
    Internal(#[from] InternalInvariantError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::Capability(_) => ErrorKind::Capability,
            PipelineError::Internal(_) => ErrorKind::InternalInvariant,
        }
    }
}

/// Error family recorded alongside every failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Capability,
    InternalInvariant,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Capability => "capability",
            ErrorKind::InternalInvariant => "internal_invariant",
        };
        write!(f, "{s}")
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_display_names_param() {
        let err = ConfigurationError::MissingParameter {
            param: "vendor_id".to_string(),
        };
        assert!(err.to_string().contains("vendor_id"));
    }

    #[test]
    fn test_pipeline_error_kind_follows_family() {
        let cfg: PipelineError = ConfigurationError::EmptyPipeline.into();
        assert_eq!(cfg.kind(), ErrorKind::Configuration);

        let cap: PipelineError = CapabilityError::AlreadyInvoked {
            capability: "payment_executor".to_string(),
        }
        .into();
        assert_eq!(cap.kind(), ErrorKind::Capability);

        let internal: PipelineError = InternalInvariantError::OutOfOrderDispatch {
            stage: "disburse".to_string(),
            expected: 0,
            actual: 1,
        }
        .into();
        assert_eq!(internal.kind(), ErrorKind::InternalInvariant);
    }

    #[test]
    fn test_timeout_display() {
        let err = CapabilityError::Timeout {
            capability: "market_price_verifier".to_string(),
            timeout_ms: 250,
        };
        let msg = err.to_string();
        assert!(msg.contains("market_price_verifier"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InternalInvariant).unwrap();
        assert_eq!(json, "\"internal_invariant\"");
    }
}
