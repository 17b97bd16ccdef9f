//! Append-only metadata log: retention pins, todo/task linkage, and artifact
//! provenance.
//!
//! All record kinds share one JSONL file, ordered by insertion and
//! discriminated by a `type` field. The log is never rewritten or compacted;
//! pin expiration is computed at read time from the step counter, never by
//! deletion.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::MetaError;

// ─── Record types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinPolicy {
    /// Keep concise results.
    PinOutcome,
    /// Keep detailed process logs.
    PinProcess,
    /// Let compaction decide.
    Auto,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self::PinOutcome
    }
}

/// A retention record protecting specific messages from compaction.
/// Read-only once written; active at step `s` iff
/// `s < created_at_step + ttl_steps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRecord {
    pub task_id: String,
    pub message_ids: Vec<String>,
    pub policy: PinPolicy,
    pub ttl_steps: u64,
    pub importance: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at_step: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoTaskMap {
    pub todo_id: String,
    pub task_id: String,
    pub created_at: String,
}

/// Provenance note about a side effect produced while performing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub task_id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(
        rename = "bytes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bytes_size: Option<u64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MetaRecord {
    Tag(PinRecord),
    Map(TodoTaskMap),
    Artifact(ArtifactRecord),
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Durable, append-only record of retention intent and task provenance,
/// independent of the message log itself.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    current_step: u64,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current_step: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The step counter used as the time base for TTL expiration. Starts at
    /// 0; advanced exactly once per completed step by the step loop.
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn increment_step(&mut self) {
        self.current_step += 1;
    }

    /// Append a pin record stamped with the current step. Later tags for the
    /// same task do not supersede earlier ones.
    pub async fn tag(
        &self,
        task_id: impl Into<String>,
        message_ids: Vec<String>,
        policy: PinPolicy,
        ttl_steps: u64,
        importance: u8,
        notes: Option<String>,
    ) -> Result<(), MetaError> {
        self.append_record(&MetaRecord::Tag(PinRecord {
            task_id: task_id.into(),
            message_ids,
            policy,
            ttl_steps,
            importance,
            notes,
            created_at_step: self.current_step,
            created_at: Utc::now().to_rfc3339(),
        }))
        .await
    }

    pub async fn map_todo_task(
        &self,
        todo_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Result<(), MetaError> {
        self.append_record(&MetaRecord::Map(TodoTaskMap {
            todo_id: todo_id.into(),
            task_id: task_id.into(),
            created_at: Utc::now().to_rfc3339(),
        }))
        .await
    }

    pub async fn record_artifact(
        &self,
        task_id: impl Into<String>,
        kind: impl Into<String>,
        path: Option<String>,
        bytes_size: Option<u64>,
    ) -> Result<(), MetaError> {
        self.append_record(&MetaRecord::Artifact(ArtifactRecord {
            task_id: task_id.into(),
            kind: kind.into(),
            path,
            bytes_size,
            created_at: Utc::now().to_rfc3339(),
        }))
        .await
    }

    /// All pins still alive at `current_step` (defaults to the store's own
    /// counter), sorted by importance descending; equal importance keeps log
    /// order. A missing log means no records, never an error.
    pub async fn list_active_pins(
        &self,
        current_step: Option<u64>,
    ) -> Result<Vec<PinRecord>, MetaError> {
        let step = current_step.unwrap_or(self.current_step);
        let mut pins: Vec<PinRecord> = self
            .read_records()
            .await?
            .into_iter()
            .filter_map(|record| match record {
                MetaRecord::Tag(pin) => Some(pin),
                _ => None,
            })
            .filter(|pin| step < pin.created_at_step + pin.ttl_steps)
            .collect();
        // Stable sort: ties keep insertion order.
        pins.sort_by(|a, b| b.importance.cmp(&a.importance));
        Ok(pins)
    }

    pub async fn list_todo_task_maps(&self) -> Result<Vec<TodoTaskMap>, MetaError> {
        Ok(self
            .read_records()
            .await?
            .into_iter()
            .filter_map(|record| match record {
                MetaRecord::Map(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    async fn append_record(&self, record: &MetaRecord) -> Result<(), MetaError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Read the full log. A malformed line is a [`MetaError::CorruptRecord`]
    /// condition; the policy here is skip-and-warn so one bad line does not
    /// poison the whole read.
    async fn read_records(&self) -> Result<Vec<MetaRecord>, MetaError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MetaRecord>(line) {
                Ok(record) => records.push(record),
                Err(source) => {
                    let corrupt = MetaError::CorruptRecord {
                        line_no: idx + 1,
                        source,
                    };
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %corrupt,
                        "skipping corrupt metadata record"
                    );
                }
            }
        }
        Ok(records)
    }
}
