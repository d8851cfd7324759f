//! Sequential, fail-fast pipeline execution.
//!
//! A [`Pipeline`] is an ordered list of stages fixed at assembly. Assembly
//! checks that every stage only reads from stages before it, so dependencies
//! can never point forward or form a cycle.
//!
//! Execution dispatches stages strictly in order. A stage that fails halts the
//! pipeline: later stages stay `Pending` and are never dispatched. Nothing is
//! retried, reordered, or run in parallel.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::cancel::CancelSignal;
use crate::capability::{CapabilityInvocation, InvocationScope};
use crate::error::{CapabilityError, ConfigurationError, InternalInvariantError, PipelineError};
use crate::obs;
use crate::stage::{Stage, StageError, StageReport, StageResult, StageStatus};
use crate::template::StageOutputs;

/// How stages are composed. Sequential is the only policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionPolicy {
    #[default]
    Sequential,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-run execution knobs.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub capability_timeout: Duration,
    pub cancel: CancelSignal,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            capability_timeout: Duration::from_millis(5_000),
            cancel: CancelSignal::never(),
        }
    }
}

/// Outcome of executing a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    /// One report per configured stage, in pipeline order.
    pub stages: Vec<StageReport>,
    pub status: RunStatus,
    /// The failure that halted the run, if any.
    pub first_failure: Option<StageError>,
}

/// Ordered, immutable stage sequence.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
    policy: CompositionPolicy,
}

impl Pipeline {
    /// Assemble a pipeline, validating ids and dependency direction.
    pub fn assemble(stages: Vec<Stage>) -> Result<Self, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::EmptyPipeline);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &stages {
            for dep in stage.dependencies() {
                if !seen.contains(dep) {
                    return Err(ConfigurationError::UnresolvedDependency {
                        stage: stage.id().to_string(),
                        depends_on: dep.to_string(),
                    });
                }
            }
            if !seen.insert(stage.id()) {
                return Err(ConfigurationError::DuplicateStage {
                    stage: stage.id().to_string(),
                });
            }
        }

        Ok(Self {
            stages,
            policy: CompositionPolicy::Sequential,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn policy(&self) -> CompositionPolicy {
        self.policy
    }

    /// Run every stage in order, halting at the first failure.
    pub async fn execute(self, options: ExecutionOptions) -> PipelineRun {
        let mut execution = Execution::new(self, options);
        let total = execution.pipeline.len();

        for position in 0..total {
            if execution.options.cancel.is_cancelled() {
                execution.cancelled = true;
                break;
            }
            if execution.dispatch(position).await.is_err() {
                break;
            }
        }

        execution.finish()
    }
}

/// Stateful stage-by-stage driver over a [`Pipeline`].
///
/// [`Pipeline::execute`] is the normal entry point; `Execution` exposes the
/// single-step `dispatch` so ordering guards can be exercised directly.
#[derive(Debug)]
pub struct Execution {
    pipeline: Pipeline,
    options: ExecutionOptions,
    outputs: StageOutputs,
    cursor: usize,
    halted: bool,
    cancelled: bool,
    first_failure: Option<StageError>,
}

impl Execution {
    pub fn new(pipeline: Pipeline, options: ExecutionOptions) -> Self {
        Self {
            pipeline,
            options,
            outputs: StageOutputs::default(),
            cursor: 0,
            halted: false,
            cancelled: false,
            first_failure: None,
        }
    }

    /// Outputs of every stage that has succeeded so far.
    pub fn outputs(&self) -> &StageOutputs {
        &self.outputs
    }

    /// Dispatch the stage at `position`, which must be the next one due.
    ///
    /// An invariant violation aborts the execution: it is recorded as the
    /// run's first failure and every later dispatch is refused.
    pub async fn dispatch(&mut self, position: usize) -> Result<(), PipelineError> {
        if let Err(violation) = self.check_due(position) {
            return Err(self.abort(position, violation));
        }

        let stage = &mut self.pipeline.stages[position];
        if let Err(violation) = stage.begin() {
            return Err(self.abort(position, violation));
        }
        self.cursor += 1;
        obs::emit_stage_started(stage.id(), stage.role().id(), position);

        let outcome = run_stage(stage, &self.outputs, &self.options).await;
        let stage = &mut self.pipeline.stages[position];
        match outcome {
            Ok(result) => {
                let output = result.output.clone();
                if let Err(violation) = stage.succeed(result) {
                    return Err(self.abort(position, violation));
                }
                self.outputs.insert(stage.id(), output);
                obs::emit_stage_finished(stage.id(), &StageStatus::Succeeded.to_string());
                Ok(())
            }
            Err((err, trace)) => {
                if matches!(err, PipelineError::Capability(CapabilityError::Cancelled { .. })) {
                    self.cancelled = true;
                }
                let stage_error = StageError::new(stage.id(), &err, trace);
                if let Err(violation) = stage.fail(stage_error.clone()) {
                    return Err(self.abort(position, violation));
                }
                obs::emit_stage_finished(stage.id(), &StageStatus::Failed.to_string());
                self.halted = true;
                self.first_failure.get_or_insert(stage_error);
                Err(err)
            }
        }
    }

    fn check_due(&self, position: usize) -> Result<(), InternalInvariantError> {
        let stage = self
            .pipeline
            .stages
            .get(position)
            .ok_or(InternalInvariantError::NoSuchStage { position })?;

        if self.halted {
            return Err(InternalInvariantError::DispatchAfterHalt {
                stage: stage.id().to_string(),
            });
        }
        if position < self.cursor {
            return Err(InternalInvariantError::TerminalReentry {
                stage: stage.id().to_string(),
                status: stage.status().to_string(),
            });
        }
        if position > self.cursor {
            return Err(InternalInvariantError::OutOfOrderDispatch {
                stage: stage.id().to_string(),
                expected: self.cursor,
                actual: position,
            });
        }
        Ok(())
    }

    /// Halt on an invariant violation and keep it as the first failure.
    fn abort(&mut self, position: usize, violation: InternalInvariantError) -> PipelineError {
        let stage_id = self
            .pipeline
            .stages
            .get(position)
            .map(|s| s.id().to_string())
            .unwrap_or_else(|| format!("#{position}"));
        let err = PipelineError::from(violation);
        error!(stage = %stage_id, error = %err, "pipeline aborted on invariant violation");

        self.halted = true;
        self.first_failure
            .get_or_insert_with(|| StageError::new(stage_id, &err, Vec::new()));
        err
    }

    /// Freeze the execution into a [`PipelineRun`].
    pub fn finish(self) -> PipelineRun {
        let stages: Vec<StageReport> = self.pipeline.stages.iter().map(Stage::report).collect();
        let all_succeeded = self.first_failure.is_none()
            && stages.iter().all(|s| s.status() == StageStatus::Succeeded);

        let status = if all_succeeded {
            RunStatus::Succeeded
        } else if self.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };

        PipelineRun {
            stages,
            status,
            first_failure: self.first_failure,
        }
    }
}

async fn run_stage(
    stage: &Stage,
    outputs: &StageOutputs,
    options: &ExecutionOptions,
) -> Result<StageResult, (PipelineError, Vec<CapabilityInvocation>)> {
    let (instructions, input) = stage
        .resolve(outputs)
        .map_err(|e| (PipelineError::from(e), Vec::new()))?;

    let role = stage.role().clone();
    let capability = role.capability_name().to_string();
    let mut scope = InvocationScope::open(stage.id(), role, options.capability_timeout)
        .with_cancel(options.cancel.clone());

    match scope.invoke(&capability, input).await {
        Ok(output) => Ok(StageResult::new(
            stage.id(),
            instructions,
            output,
            scope.into_trace(),
        )),
        Err(err) => Err((err.into(), scope.into_trace())),
    }
}
