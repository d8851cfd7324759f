//! Append-only audit journal of completed runs.
//!
//! Provides the [`RunJournal`] trait plus two backends: [`MemoryRunJournal`]
//! for tests and embedding, and [`FsRunJournal`] for a durable one-file-per-run
//! layout on disk.

mod fs;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::record::RunRecord;

pub use fs::FsRunJournal;

/// Journal failures.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("run not found: {run_id}")]
    NotFound { run_id: Uuid },

    #[error("run already recorded: {run_id}")]
    AlreadyRecorded { run_id: Uuid },

    #[error("no journal at {}", root.display())]
    Missing { root: PathBuf },

    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type JournalResult<T> = std::result::Result<T, JournalError>;

/// Persistent store of completed [`RunRecord`]s.
#[async_trait]
pub trait RunJournal: Send + Sync {
    /// Record a completed run. A run id may be appended once.
    async fn append(&self, record: &RunRecord) -> JournalResult<()>;

    /// Retrieve a run by id.
    async fn get(&self, run_id: Uuid) -> JournalResult<RunRecord>;

    /// Every recorded run, oldest first.
    async fn list(&self) -> JournalResult<Vec<RunRecord>>;
}

/// In-memory journal backed by a `HashMap<run_id, RunRecord>`.
#[derive(Debug, Default)]
pub struct MemoryRunJournal {
    runs: Mutex<HashMap<Uuid, RunRecord>>,
}

impl MemoryRunJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunJournal for MemoryRunJournal {
    async fn append(&self, record: &RunRecord) -> JournalResult<()> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&record.run_id) {
            return Err(JournalError::AlreadyRecorded {
                run_id: record.run_id,
            });
        }
        runs.insert(record.run_id, record.clone());
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> JournalResult<RunRecord> {
        self.runs
            .lock()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(JournalError::NotFound { run_id })
    }

    async fn list(&self) -> JournalResult<Vec<RunRecord>> {
        let mut records: Vec<RunRecord> = self.runs.lock().await.values().cloned().collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::pipeline::RunStatus;
    use crate::record::RunRecord;
    use crate::request::DisbursementRequest;

    /// A minimal record started `offset_secs` from now.
    pub fn record(offset_secs: i64) -> RunRecord {
        let started_at = Utc::now() + Duration::seconds(offset_secs);
        RunRecord {
            run_id: Uuid::new_v4(),
            request: DisbursementRequest::new("Urea", 10, "V-1", "F-1"),
            stages: vec![],
            overall_status: RunStatus::Failed,
            first_failure: None,
            started_at,
            finished_at: started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[tokio::test]
    async fn test_memory_append_get() {
        let journal = MemoryRunJournal::new();
        let rec = record(0);
        journal.append(&rec).await.unwrap();
        assert_eq!(journal.get(rec.run_id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn test_memory_rejects_second_append() {
        let journal = MemoryRunJournal::new();
        let rec = record(0);
        journal.append(&rec).await.unwrap();
        assert!(matches!(
            journal.append(&rec).await,
            Err(JournalError::AlreadyRecorded { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_missing_run() {
        let journal = MemoryRunJournal::new();
        assert!(matches!(
            journal.get(Uuid::new_v4()).await,
            Err(JournalError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_list_oldest_first() {
        let journal = MemoryRunJournal::new();
        let later = record(60);
        let earlier = record(0);
        journal.append(&later).await.unwrap();
        journal.append(&earlier).await.unwrap();

        let ids: Vec<Uuid> = journal.list().await.unwrap().iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![earlier.run_id, later.run_id]);
    }
}
