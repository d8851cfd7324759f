//! Capabilities: the single external operation each role may invoke.
//!
//! # Module layout
//!
//! - [`schema`]: `ParamType`, `ParamSpec`, `InputSchema` validation
//! - [`registry`]: `CapabilityRegistry`, shared read-only across runs
//! - [`dispatch`]: `InvocationScope`, the per-stage authorisation and
//!   at-most-once guard, and the `CapabilityInvocation` trace

pub mod dispatch;
pub mod registry;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use dispatch::{CapabilityInvocation, InvocationOutcome, InvocationScope};
pub use registry::CapabilityRegistry;
pub use schema::{InputSchema, ParamSpec, ParamType};

/// Named capability inputs, keyed by parameter name.
pub type CapabilityInput = Map<String, Value>;

/// Side-effect class declared by a capability.
///
/// `AtMostOnce` is mandatory for anything that moves money (payments,
/// deductions); the dispatch layer refuses a second call within one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectClass {
    SideEffectFree,
    AtMostOnce,
}

impl EffectClass {
    /// Whether a caller may safely resubmit the same call.
    pub fn is_retry_safe(&self) -> bool {
        matches!(self, EffectClass::SideEffectFree)
    }
}

/// Static description of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub effect: EffectClass,
}

/// Contract for the external collaborator behind a capability.
///
/// Implementations receive input that has already passed schema validation.
/// Errors are plain messages; the dispatch layer wraps them into
/// [`crate::error::CapabilityError::Collaborator`].
#[async_trait]
pub trait Capability: Send + Sync + 'static {
    fn spec(&self) -> &CapabilitySpec;

    async fn call(&self, input: &CapabilityInput) -> std::result::Result<Value, String>;
}
