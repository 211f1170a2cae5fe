//! Journal adapter -- append-only JSON-lines record of workflow runs.
//!
//! Every invocation appends exactly one line. The file and any missing
//! parent directories are created on first write, so a fresh device starts
//! journaling without setup.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use neurodeck_engine::{Capability, CapabilityError, CapabilityResult, JOURNAL_CAPABILITY};

/// Journal capability writing JSON lines to a single file.
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    /// Create a journal that appends to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this journal appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Capability for JsonlJournal {
    fn name(&self) -> &str {
        JOURNAL_CAPABILITY
    }

    async fn invoke(&self, request: Value) -> CapabilityResult {
        let record = request
            .get("record")
            .ok_or_else(|| CapabilityError::InvalidRequest {
                reason: "missing required field `record`".into(),
            })?;

        let line =
            serde_json::to_string(record).map_err(|e| CapabilityError::InvalidRequest {
                reason: format!("record does not serialize: {e}"),
            })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        debug!(path = %self.path.display(), bytes = line.len(), "journal line appended");

        Ok(json!({
            "written": true,
            "path": self.path.display().to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let journal = JsonlJournal::new(&path);

        journal
            .invoke(json!({"record": {"workflow": "MESSAGE", "status": "completed"}}))
            .await
            .unwrap();
        journal
            .invoke(json!({"record": {"workflow": "SNAPSHOT", "status": "aborted"}}))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["workflow"], "MESSAGE");
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "aborted");
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("log.jsonl");
        let journal = JsonlJournal::new(&path);

        let payload = journal.invoke(json!({"record": {"ok": true}})).await.unwrap();
        assert_eq!(payload["written"], true);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn record_field_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JsonlJournal::new(dir.path().join("log.jsonl"));

        let err = journal.invoke(json!({"other": 1})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn non_object_records_are_journaled_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let journal = JsonlJournal::new(&path);

        journal.invoke(json!({"record": "plain text"})).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "\"plain text\"\n");
    }
}
