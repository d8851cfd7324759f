//! Run record: the audit trail and outcome of one pipeline execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::RunStatus;
use crate::request::DisbursementRequest;
use crate::response::SettlementResponse;
use crate::stage::{StageError, StageReport, StageStatus};

/// Immutable record of one run, produced by the orchestrator and returned by
/// value. `stages` always holds one entry per configured stage, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub request: DisbursementRequest,
    pub stages: Vec<StageReport>,
    pub overall_status: RunStatus,
    /// The failure that halted the run, if any.
    pub first_failure: Option<StageError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn stage(&self, stage_id: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    pub fn succeeded(&self) -> bool {
        self.overall_status == RunStatus::Succeeded
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// One `"<role name>: <summary>"` line per succeeded stage, in order.
    pub fn logs(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter_map(|s| {
                s.result()
                    .map(|r| format!("{}: {}", s.role.name, r.summary()))
            })
            .collect()
    }

    /// Summary of the terminal stage, present only when the run succeeded.
    pub fn settlement_summary(&self) -> Option<String> {
        if !self.succeeded() {
            return None;
        }
        self.stages.last().and_then(|s| s.result()).map(|r| r.summary())
    }

    /// Human-readable account of why the run did not succeed.
    pub fn failure_message(&self) -> Option<String> {
        if let Some(failure) = &self.first_failure {
            return Some(format!(
                "{} error in stage '{}': {}",
                failure.kind, failure.stage_id, failure.message
            ));
        }
        match self.overall_status {
            RunStatus::Succeeded => None,
            RunStatus::Cancelled => Some(match self.first_pending() {
                Some(stage) => format!("run cancelled before stage '{stage}'"),
                None => "run cancelled".to_string(),
            }),
            RunStatus::Failed => Some("run failed".to_string()),
        }
    }

    fn first_pending(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| s.status() == StageStatus::Pending)
            .map(|s| s.stage_id.as_str())
    }

    /// Convert into the outbound payload.
    pub fn to_response(&self) -> SettlementResponse {
        match self.settlement_summary() {
            Some(result) => SettlementResponse::Success {
                result,
                logs: self.logs(),
            },
            None => SettlementResponse::error(
                self.failure_message()
                    .unwrap_or_else(|| "run produced no settlement".to_string()),
            ),
        }
    }
}
