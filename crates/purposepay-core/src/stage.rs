//! Stage definitions, construction, and the per-stage state machine.
//!
//! A stage is built from a [`StageSpec`] plus request parameters. Building
//! resolves every request placeholder and request-bound input up front, so a
//! missing parameter is reported before anything is dispatched. References to
//! earlier stages stay deferred until dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Digest as _;

use crate::capability::{CapabilityInput, CapabilityInvocation};
use crate::error::{ConfigurationError, ErrorKind, InternalInvariantError, PipelineError};
use crate::role::{Role, RoleDescriptor};
use crate::template::{InstructionTemplate, StageOutputs, StageRef};

/// Request-derived parameters available to stage templates and bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageParams(BTreeMap<String, Value>);

impl StageParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Look up `name`, treating absent, null, and blank strings as missing.
    pub fn require(&self, name: &str) -> Result<&Value, ConfigurationError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Err(ConfigurationError::MissingParameter {
                param: name.to_string(),
            }),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(ConfigurationError::MissingParameter {
                    param: name.to_string(),
                })
            }
            Some(v) => Ok(v),
        }
    }
}

/// Where a capability input value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", content = "value", rename_all = "snake_case")]
pub enum InputBinding {
    Literal(Value),
    Request(String),
    StageOutput(StageRef),
}

/// Coarse stage status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Output of a stage that reached `Succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    /// Fully resolved instructions the stage ran with.
    pub instructions: String,
    pub output: Value,
    /// SHA-256 hex digest of `serde_json::to_vec(&output)`.
    pub output_digest: String,
    pub capability_trace: Vec<CapabilityInvocation>,
}

impl StageResult {
    pub fn new(
        stage_id: impl Into<String>,
        instructions: String,
        output: Value,
        capability_trace: Vec<CapabilityInvocation>,
    ) -> Self {
        let output_digest = digest_output(&output);
        Self {
            stage_id: stage_id.into(),
            instructions,
            output,
            output_digest,
            capability_trace,
        }
    }

    /// Re-derive the digest and compare it to the recorded one.
    pub fn verify_digest(&self) -> bool {
        digest_output(&self.output) == self.output_digest
    }

    /// `output.summary` when present, else the rendered output.
    pub fn summary(&self) -> String {
        match self.output.get("summary").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => crate::template::render_value(&self.output),
        }
    }
}

fn digest_output(output: &Value) -> String {
    // serializing a Value cannot fail
    let bytes = serde_json::to_vec(output).unwrap_or_default();
    hex::encode(sha2::Sha256::digest(&bytes))
}

/// Failure recorded for a stage that reached `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub capability_trace: Vec<CapabilityInvocation>,
}

impl StageError {
    /// `kind` carries the error family, so `message` holds only the inner
    /// error's text.
    pub fn new(
        stage_id: impl Into<String>,
        error: &PipelineError,
        capability_trace: Vec<CapabilityInvocation>,
    ) -> Self {
        let message = match error {
            PipelineError::Configuration(e) => e.to_string(),
            PipelineError::Capability(e) => e.to_string(),
            PipelineError::Internal(e) => e.to_string(),
        };
        Self {
            stage_id: stage_id.into(),
            kind: error.kind(),
            message,
            capability_trace,
        }
    }
}

/// Stage state machine: `Pending -> Running -> {Succeeded, Failed}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded(StageResult),
    Failed(StageError),
}

impl StageState {
    pub fn status(&self) -> StageStatus {
        match self {
            StageState::Pending => StageStatus::Pending,
            StageState::Running => StageStatus::Running,
            StageState::Succeeded(_) => StageStatus::Succeeded,
            StageState::Failed(_) => StageStatus::Failed,
        }
    }
}

/// Declarative stage description, before request parameters are applied.
#[derive(Debug, Clone)]
pub struct StageSpec {
    id: String,
    role: Arc<Role>,
    instructions: String,
    expected_output: String,
    inputs: Vec<(String, InputBinding)>,
}

impl StageSpec {
    pub fn new(id: impl Into<String>, role: Arc<Role>) -> Self {
        Self {
            id: id.into(),
            role,
            instructions: String::new(),
            expected_output: String::new(),
            inputs: Vec::new(),
        }
    }

    pub fn instructions(mut self, template: impl Into<String>) -> Self {
        self.instructions = template.into();
        self
    }

    pub fn expected_output(mut self, contract: impl Into<String>) -> Self {
        self.expected_output = contract.into();
        self
    }

    /// Bind capability input `param` to `binding`.
    pub fn input(mut self, param: impl Into<String>, binding: InputBinding) -> Self {
        self.inputs.push((param.into(), binding));
        self
    }

    /// Apply request parameters, producing a `Pending` stage.
    pub fn build(self, params: &StageParams) -> Result<Stage, ConfigurationError> {
        let instructions = InstructionTemplate::parse(&self.instructions).bind_params(params)?;

        let inputs = self
            .inputs
            .into_iter()
            .map(|(param, binding)| {
                let bound = match binding {
                    InputBinding::Request(name) => {
                        InputBinding::Literal(params.require(&name)?.clone())
                    }
                    other => other,
                };
                Ok((param, bound))
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        Ok(Stage {
            id: self.id,
            role: self.role,
            instructions,
            expected_output: self.expected_output,
            inputs,
            state: StageState::Pending,
        })
    }
}

/// A unit of pipeline work bound to one role.
#[derive(Debug, Clone)]
pub struct Stage {
    id: String,
    role: Arc<Role>,
    instructions: InstructionTemplate,
    expected_output: String,
    inputs: Vec<(String, InputBinding)>,
    state: StageState,
}

impl Stage {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> &Arc<Role> {
        &self.role
    }

    pub fn status(&self) -> StageStatus {
        self.state.status()
    }

    /// Ids of every stage this one reads from, deduplicated, in first-use order.
    pub fn dependencies(&self) -> Vec<&str> {
        let from_inputs = self.inputs.iter().filter_map(|(_, b)| match b {
            InputBinding::StageOutput(r) => Some(r),
            _ => None,
        });
        let mut deps: Vec<&str> = Vec::new();
        for r in self.instructions.stage_refs().into_iter().chain(from_inputs) {
            if !deps.contains(&r.stage.as_str()) {
                deps.push(&r.stage);
            }
        }
        deps
    }

    /// Resolve instructions and capability input against earlier outputs.
    pub fn resolve(
        &self,
        outputs: &StageOutputs,
    ) -> Result<(String, CapabilityInput), ConfigurationError> {
        let instructions = self.instructions.render(&self.id, outputs)?;
        let mut input = CapabilityInput::new();
        for (param, binding) in &self.inputs {
            let value = match binding {
                InputBinding::Literal(v) => v.clone(),
                InputBinding::StageOutput(r) => outputs.resolve(&self.id, r)?.clone(),
                InputBinding::Request(name) => {
                    return Err(ConfigurationError::MissingParameter {
                        param: name.clone(),
                    })
                }
            };
            input.insert(param.clone(), value);
        }
        Ok((instructions, input))
    }

    pub fn begin(&mut self) -> Result<(), InternalInvariantError> {
        match &self.state {
            StageState::Pending => {
                self.state = StageState::Running;
                Ok(())
            }
            StageState::Running => Err(self.illegal(StageStatus::Running)),
            terminal => Err(InternalInvariantError::TerminalReentry {
                stage: self.id.clone(),
                status: terminal.status().to_string(),
            }),
        }
    }

    pub fn succeed(&mut self, result: StageResult) -> Result<(), InternalInvariantError> {
        self.finish(StageState::Succeeded(result))
    }

    pub fn fail(&mut self, error: StageError) -> Result<(), InternalInvariantError> {
        self.finish(StageState::Failed(error))
    }

    fn finish(&mut self, next: StageState) -> Result<(), InternalInvariantError> {
        if self.state != StageState::Running {
            return Err(self.illegal(next.status()));
        }
        self.state = next;
        Ok(())
    }

    fn illegal(&self, to: StageStatus) -> InternalInvariantError {
        InternalInvariantError::IllegalTransition {
            stage: self.id.clone(),
            from: self.status().to_string(),
            to: to.to_string(),
        }
    }

    pub fn report(&self) -> StageReport {
        StageReport {
            stage_id: self.id.clone(),
            role: self.role.descriptor(),
            expected_output: self.expected_output.clone(),
            state: self.state.clone(),
        }
    }
}

/// Snapshot of a stage for the run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage_id: String,
    pub role: RoleDescriptor,
    pub expected_output: String,
    pub state: StageState,
}

impl StageReport {
    pub fn status(&self) -> StageStatus {
        self.state.status()
    }

    pub fn result(&self) -> Option<&StageResult> {
        match &self.state {
            StageState::Succeeded(r) => Some(r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match &self.state {
            StageState::Failed(e) => Some(e),
            _ => None,
        }
    }
}
