//! Fail-fast sequencing across arbitrary pipelines.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use purposepay_core::{
    cancellation, Capability, CapabilityInput, CapabilitySpec, EffectClass, ErrorKind,
    ExecutionOptions, InputBinding, InputSchema, ParamSpec, ParamType, Pipeline, Role, RunStatus,
    Stage, StageParams, StageRef, StageSpec, StageStatus,
};
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Succeed,
    Fail,
    /// Sleeps far longer than any test timeout.
    Stall,
}

/// Returns `{"summary": "<name> ok", "n": <call index>}` unless told otherwise.
struct Counting {
    spec: CapabilitySpec,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Capability for Counting {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn call(&self, _input: &CapabilityInput) -> Result<Value, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Fail => return Err(format!("{} refused", self.spec.name)),
            Behaviour::Stall => sleep(Duration::from_secs(3_600)).await,
        }
        Ok(json!({"summary": format!("{} ok", self.spec.name), "n": n}))
    }
}

struct Harness {
    stages: Vec<Stage>,
    calls: Vec<Arc<AtomicUsize>>,
}

/// A linear pipeline of `len` stages where each stage reads the previous
/// stage's output. Stage `fail_at` (if any) has a failing collaborator.
fn chain(len: usize, fail_at: Option<usize>) -> Harness {
    chain_with(len, |i| {
        if fail_at == Some(i) {
            Behaviour::Fail
        } else {
            Behaviour::Succeed
        }
    })
}

fn chain_with(len: usize, behaviour: impl Fn(usize) -> Behaviour) -> Harness {
    let mut stages = Vec::new();
    let mut calls = Vec::new();
    for i in 0..len {
        let counter = Arc::new(AtomicUsize::new(0));
        let cap = Counting {
            spec: CapabilitySpec {
                name: format!("cap{i}"),
                description: String::new(),
                input_schema: InputSchema::new(vec![ParamSpec::optional(
                    "previous",
                    ParamType::String,
                )]),
                effect: EffectClass::AtMostOnce,
            },
            behaviour: behaviour(i),
            calls: counter.clone(),
        };
        let role = Arc::new(Role::new(format!("role{i}"), format!("Role {i}"), "work", Arc::new(cap)));
        let mut spec = StageSpec::new(format!("s{i}"), role).instructions(format!("step {i}"));
        if i > 0 {
            spec = spec
                .instructions(format!("step {i} after {{stage:s{}/summary}}", i - 1))
                .input(
                    "previous",
                    InputBinding::StageOutput(StageRef::field(format!("s{}", i - 1), "/summary")),
                );
        }
        stages.push(spec.build(&StageParams::new()).unwrap());
        calls.push(counter);
    }
    Harness { stages, calls }
}

#[tokio::test]
async fn all_stages_succeed_in_order() {
    let h = chain(4, None);
    let run = Pipeline::assemble(h.stages)
        .unwrap()
        .execute(ExecutionOptions::default())
        .await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.stages.len(), 4);
    assert!(run.stages.iter().all(|s| s.status() == StageStatus::Succeeded));
    assert!(h.calls.iter().all(|c| c.load(Ordering::SeqCst) == 1));

    let last = run.stages[3].result().unwrap();
    assert_eq!(last.instructions, "step 3 after cap2 ok");
}

#[tokio::test]
async fn failure_at_each_position_halts_everything_after_it() {
    for k in 0..3 {
        let h = chain(3, Some(k));
        let run = Pipeline::assemble(h.stages)
            .unwrap()
            .execute(ExecutionOptions::default())
            .await;

        assert_eq!(run.status, RunStatus::Failed, "fail_at={k}");
        assert_eq!(run.stages.len(), 3);
        for (i, stage) in run.stages.iter().enumerate() {
            let expected = match i.cmp(&k) {
                std::cmp::Ordering::Less => StageStatus::Succeeded,
                std::cmp::Ordering::Equal => StageStatus::Failed,
                std::cmp::Ordering::Greater => StageStatus::Pending,
            };
            assert_eq!(stage.status(), expected, "fail_at={k} stage={i}");
            let dispatched = if i <= k { 1 } else { 0 };
            assert_eq!(h.calls[i].load(Ordering::SeqCst), dispatched);
        }

        let failure = run.first_failure.expect("first failure recorded");
        assert_eq!(failure.stage_id, format!("s{k}"));
        assert_eq!(failure.kind, ErrorKind::Capability);
        assert!(failure.message.contains(&format!("cap{k} refused")));
        assert_eq!(failure.capability_trace.len(), 1);
    }
}

#[tokio::test]
async fn digests_match_recorded_outputs() {
    let h = chain(2, None);
    let run = Pipeline::assemble(h.stages)
        .unwrap()
        .execute(ExecutionOptions::default())
        .await;

    for stage in &run.stages {
        let result = stage.result().unwrap();
        assert!(result.verify_digest());
        let reparsed: Value = serde_json::from_str(&result.output.to_string()).unwrap();
        assert_eq!(reparsed, result.output);
    }
}

#[tokio::test]
async fn cancellation_before_start_dispatches_nothing() {
    let h = chain(3, None);
    let (handle, signal) = cancellation();
    handle.cancel();

    let run = Pipeline::assemble(h.stages)
        .unwrap()
        .execute(ExecutionOptions {
            cancel: signal,
            ..ExecutionOptions::default()
        })
        .await;

    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.first_failure.is_none());
    assert!(run.stages.iter().all(|s| s.status() == StageStatus::Pending));
    assert!(h.calls.iter().all(|c| c.load(Ordering::SeqCst) == 0));
}

#[tokio::test(start_paused = true)]
async fn timeout_at_each_position_halts_like_a_failure() {
    for k in 0..3 {
        let h = chain_with(3, |i| if i == k { Behaviour::Stall } else { Behaviour::Succeed });
        let run = Pipeline::assemble(h.stages)
            .unwrap()
            .execute(ExecutionOptions {
                capability_timeout: Duration::from_millis(100),
                ..ExecutionOptions::default()
            })
            .await;

        assert_eq!(run.status, RunStatus::Failed, "stall_at={k}");
        for (i, stage) in run.stages.iter().enumerate() {
            let expected = match i.cmp(&k) {
                std::cmp::Ordering::Less => StageStatus::Succeeded,
                std::cmp::Ordering::Equal => StageStatus::Failed,
                std::cmp::Ordering::Greater => StageStatus::Pending,
            };
            assert_eq!(stage.status(), expected, "stall_at={k} stage={i}");
        }
        assert!(h.calls[k + 1..].iter().all(|c| c.load(Ordering::SeqCst) == 0));

        let failure = run.first_failure.expect("first failure recorded");
        assert_eq!(failure.stage_id, format!("s{k}"));
        assert_eq!(failure.kind, ErrorKind::Capability);
        assert_eq!(
            failure.message,
            format!("capability 'cap{k}' timed out after 100ms")
        );
        assert_eq!(failure.capability_trace.len(), 1);
    }
}
