use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use uuid::Uuid;

use super::{JournalError, JournalResult, RunJournal};
use crate::record::RunRecord;

/// Filesystem-backed journal.
///
/// Layout: `<root>/runs/<run_id>.json`, one pretty-printed record per file.
#[derive(Debug, Clone)]
pub struct FsRunJournal {
    runs_dir: PathBuf,
}

impl FsRunJournal {
    /// Open a journal rooted at `root`. Creates `root/runs/` if needed.
    pub fn open(root: impl AsRef<Path>) -> JournalResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        std::fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    /// Open a journal that must already exist. Never creates directories.
    pub fn open_existing(root: impl AsRef<Path>) -> JournalResult<Self> {
        let root = root.as_ref();
        let runs_dir = root.join("runs");
        if !runs_dir.is_dir() {
            return Err(JournalError::Missing {
                root: root.to_path_buf(),
            });
        }
        Ok(Self { runs_dir })
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn record_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    // Temp file in the same directory, then rename.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl RunJournal for FsRunJournal {
    async fn append(&self, record: &RunRecord) -> JournalResult<()> {
        let path = self.record_path(record.run_id);
        if tokio::fs::try_exists(&path).await? {
            return Err(JournalError::AlreadyRecorded {
                run_id: record.run_id,
            });
        }

        let bytes = serde_json::to_vec_pretty(record)?;
        let dir = self.runs_dir.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> JournalResult<RunRecord> {
        let bytes = match tokio::fs::read(self.record_path(run_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JournalError::NotFound { run_id })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(&self) -> JournalResult<Vec<RunRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.runs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice::<RunRecord>(&bytes)?);
        }
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::record;
    use super::*;

    fn make_journal() -> (tempfile::TempDir, FsRunJournal) {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsRunJournal::open(dir.path()).unwrap();
        (dir, journal)
    }

    #[tokio::test]
    async fn test_record_roundtrip() {
        let (_dir, journal) = make_journal();
        let rec = record(0);
        journal.append(&rec).await.unwrap();

        assert!(journal.runs_dir().join(format!("{}.json", rec.run_id)).exists());
        assert_eq!(journal.get(rec.run_id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn test_append_is_write_once() {
        let (_dir, journal) = make_journal();
        let rec = record(0);
        journal.append(&rec).await.unwrap();
        assert!(matches!(
            journal.append(&rec).await,
            Err(JournalError::AlreadyRecorded { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_missing_run() {
        let (_dir, journal) = make_journal();
        assert!(matches!(
            journal.get(Uuid::new_v4()).await,
            Err(JournalError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let (_dir, journal) = make_journal();
        let second = record(30);
        let first = record(0);
        journal.append(&second).await.unwrap();
        journal.append(&first).await.unwrap();
        std::fs::write(journal.runs_dir().join("notes.txt"), "ignore me").unwrap();

        let listed = journal.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].run_id, first.run_id);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_serialization_error() {
        let (_dir, journal) = make_journal();
        let run_id = Uuid::new_v4();
        std::fs::write(journal.runs_dir().join(format!("{run_id}.json")), "{").unwrap();
        assert!(matches!(
            journal.get(run_id).await,
            Err(JournalError::Serialization(_))
        ));
    }

    #[test]
    fn test_reopen_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        FsRunJournal::open(dir.path()).unwrap();
        assert!(FsRunJournal::open(dir.path()).is_ok());
    }

    #[test]
    fn test_open_existing_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("journal");

        let err = FsRunJournal::open_existing(&root).unwrap_err();
        assert!(matches!(err, JournalError::Missing { root: r } if r == root));
        assert!(!root.exists());

        FsRunJournal::open(&root).unwrap();
        let journal = FsRunJournal::open_existing(&root).unwrap();
        assert_eq!(journal.runs_dir(), root.join("runs"));
    }
}
