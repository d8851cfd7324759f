//! Per-stage capability dispatch.
//!
//! An [`InvocationScope`] is opened for one stage execution and bound to that
//! stage's role. Every call goes through the same gate:
//!
//! 1. the requested capability must be the role's own (`NotPermitted`)
//! 2. the input must satisfy the declared schema (`InvalidInput`)
//! 3. an `AtMostOnce` capability may be called once per scope (`AlreadyInvoked`)
//! 4. the call runs under the scope's timeout (`Timeout`)
//!
//! Each attempt, rejected or not, lands in the scope's trace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelSignal;
use crate::error::CapabilityError;
use crate::obs;
use crate::role::Role;

use super::{CapabilityInput, EffectClass};

/// How a single invocation attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The collaborator returned a value.
    Returned { output: Value },
    /// The collaborator was reached and failed, timed out, or was abandoned.
    Failed { error: String },
    /// The dispatch gate refused the call; no collaborator was reached.
    Rejected { error: String },
}

/// One entry in a stage's capability trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInvocation {
    pub capability: String,
    pub input: CapabilityInput,
    pub invoked_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: InvocationOutcome,
}

impl CapabilityInvocation {
    /// Whether this attempt reached the collaborator.
    pub fn dispatched(&self) -> bool {
        !matches!(self.outcome, InvocationOutcome::Rejected { .. })
    }
}

/// Authorisation and at-most-once guard for one stage execution.
pub struct InvocationScope {
    stage_id: String,
    role: Arc<Role>,
    timeout: Duration,
    cancel: CancelSignal,
    invocations: HashMap<String, u32>,
    trace: Vec<CapabilityInvocation>,
}

impl InvocationScope {
    pub fn open(stage_id: impl Into<String>, role: Arc<Role>, timeout: Duration) -> Self {
        Self {
            stage_id: stage_id.into(),
            role,
            timeout,
            cancel: CancelSignal::never(),
            invocations: HashMap::new(),
            trace: Vec::new(),
        }
    }

    /// Attach a cancellation signal. Only side-effect-free calls race it.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// Number of calls of `capability` that passed the gate in this scope.
    pub fn invocation_count(&self, capability: &str) -> u32 {
        self.invocations.get(capability).copied().unwrap_or(0)
    }

    pub fn trace(&self) -> &[CapabilityInvocation] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<CapabilityInvocation> {
        self.trace
    }

    /// Invoke `capability` with `input` on behalf of the scope's role.
    pub async fn invoke(
        &mut self,
        capability: &str,
        input: CapabilityInput,
    ) -> Result<Value, CapabilityError> {
        let invoked_at = Utc::now();

        if let Err(err) = self.admit(capability, &input) {
            self.trace.push(CapabilityInvocation {
                capability: capability.to_string(),
                input,
                invoked_at,
                duration_ms: 0,
                outcome: InvocationOutcome::Rejected {
                    error: err.to_string(),
                },
            });
            return Err(err);
        }

        // Counted before the call: a failed or timed-out financial call still
        // consumes the stage's single attempt.
        *self.invocations.entry(capability.to_string()).or_insert(0) += 1;

        let started = Instant::now();
        let result = self.call(capability, &input).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        obs::emit_capability_invoked(&self.stage_id, capability, duration_ms, result.is_ok());

        let outcome = match &result {
            Ok(output) => InvocationOutcome::Returned {
                output: output.clone(),
            },
            Err(err) => InvocationOutcome::Failed {
                error: err.to_string(),
            },
        };
        self.trace.push(CapabilityInvocation {
            capability: capability.to_string(),
            input,
            invoked_at,
            duration_ms,
            outcome,
        });

        result
    }

    fn admit(&self, capability: &str, input: &CapabilityInput) -> Result<(), CapabilityError> {
        if capability != self.role.capability_name() {
            return Err(CapabilityError::NotPermitted {
                role: self.role.id().to_string(),
                capability: capability.to_string(),
            });
        }

        let spec = self.role.capability().spec();
        spec.input_schema.validate(capability, input)?;

        if spec.effect == EffectClass::AtMostOnce && self.invocation_count(capability) > 0 {
            return Err(CapabilityError::AlreadyInvoked {
                capability: capability.to_string(),
            });
        }
        Ok(())
    }

    async fn call(
        &self,
        capability: &str,
        input: &CapabilityInput,
    ) -> Result<Value, CapabilityError> {
        let target = self.role.capability();
        let timeout_ms = self.timeout.as_millis() as u64;
        let timed = tokio::time::timeout(self.timeout, target.call(input));

        let resolved = match target.spec().effect {
            // In-flight financial calls run to completion; cancellation waits
            // for the next stage boundary.
            EffectClass::AtMostOnce => timed.await,
            EffectClass::SideEffectFree => {
                let mut cancel = self.cancel.clone();
                tokio::select! {
                    res = timed => res,
                    _ = cancel.cancelled() => {
                        return Err(CapabilityError::Cancelled {
                            capability: capability.to_string(),
                        });
                    }
                }
            }
        };

        match resolved {
            Err(_) => Err(CapabilityError::Timeout {
                capability: capability.to_string(),
                timeout_ms,
            }),
            Ok(Err(message)) => Err(CapabilityError::Collaborator {
                capability: capability.to_string(),
                message,
            }),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

impl std::fmt::Debug for InvocationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationScope")
            .field("stage_id", &self.stage_id)
            .field("role", &self.role.id())
            .field("timeout", &self.timeout)
            .field("invocations", &self.invocations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, CapabilitySpec, InputSchema, ParamSpec, ParamType};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        spec: CapabilitySpec,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for Counting {
        fn spec(&self) -> &CapabilitySpec {
            &self.spec
        }

        async fn call(&self, input: &CapabilityInput) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"echo": input.get("vendor_id").cloned()}))
        }
    }

    fn role(effect: EffectClass) -> (Arc<Role>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cap = Counting {
            spec: CapabilitySpec {
                name: "payment_executor".to_string(),
                description: "pay a vendor".to_string(),
                input_schema: InputSchema::new(vec![ParamSpec::required(
                    "vendor_id",
                    ParamType::String,
                )]),
                effect,
            },
            calls: Arc::clone(&calls),
        };
        let role = Role::new("disburser", "The Escrow", "pay vendors", Arc::new(cap));
        (Arc::new(role), calls)
    }

    fn vendor_input() -> CapabilityInput {
        json!({"vendor_id": "V-9988"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_not_permitted_never_reaches_collaborator() {
        let (role, calls) = role(EffectClass::AtMostOnce);
        let mut scope = InvocationScope::open("disburse", role, Duration::from_secs(1));

        let err = scope
            .invoke("market_price_verifier", vendor_input())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotPermitted { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scope.trace().len(), 1);
        assert!(!scope.trace()[0].dispatched());
    }

    #[tokio::test]
    async fn test_side_effect_free_may_repeat() {
        let (role, calls) = role(EffectClass::SideEffectFree);
        let mut scope = InvocationScope::open("verify", role, Duration::from_secs(1));

        scope.invoke("payment_executor", vendor_input()).await.unwrap();
        scope.invoke("payment_executor", vendor_input()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scope.invocation_count("payment_executor"), 2);
    }

    #[tokio::test]
    async fn test_trace_records_input_and_output() {
        let (role, _calls) = role(EffectClass::AtMostOnce);
        let mut scope = InvocationScope::open("disburse", role, Duration::from_secs(1));
        scope.invoke("payment_executor", vendor_input()).await.unwrap();

        let trace = scope.into_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].input, vendor_input());
        assert_eq!(
            trace[0].outcome,
            InvocationOutcome::Returned {
                output: json!({"echo": "V-9988"})
            }
        );
    }
}
