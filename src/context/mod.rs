//! The ordered conversation log plus checkpoint index and token accounting.
//!
//! Checkpoints are never mutated, only appended or truncated on revert.
//! Retention queries are delegated to the [`MetadataStore`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::error::ContextError;
use crate::message::{Message, Role};
use crate::metadata::MetadataStore;

/// Shared handle to one conversation's context. The step loop's sequencing
/// (one step completes, including its shielded mutation, before the next
/// begins) is the only synchronization discipline required on top of this.
pub type SharedContext = Arc<tokio::sync::Mutex<Context>>;

/// Marker appended before a checkpoint position when the toolset can time
/// travel, so a revert target always lands on a clean turn boundary.
const CHECKPOINT_MARKER: &str = "Checkpoint boundary.";

/// An immutable marker of conversation position, used as a revert target.
/// The checkpoint id is its index in the checkpoint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub n_messages: usize,
    pub token_count: u64,
}

pub struct Context {
    history: Vec<Message>,
    checkpoints: Vec<Checkpoint>,
    token_count: u64,
    meta: MetadataStore,
    history_path: Option<PathBuf>,
    task_id: Option<String>,
}

impl Context {
    /// In-memory context; history is not persisted. Used by tests and
    /// sub-task runs that do not need durability.
    pub fn new(meta: MetadataStore) -> Self {
        Self {
            history: Vec::new(),
            checkpoints: Vec::new(),
            token_count: 0,
            meta,
            history_path: None,
            task_id: None,
        }
    }

    /// Context whose history is mirrored to a JSONL log, one message per
    /// line, appended as the conversation grows.
    pub fn with_file_backend(history_path: impl Into<PathBuf>, meta: MetadataStore) -> Self {
        Self {
            history_path: Some(history_path.into()),
            ..Self::new(meta)
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn n_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    /// A budgeting signal only; never exact.
    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    pub fn meta(&self) -> &MetadataStore {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut MetadataStore {
        &mut self.meta
    }

    /// Append one or more messages at the end of history, in order.
    pub async fn append(
        &mut self,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<(), ContextError> {
        for message in messages {
            self.persist_line(&message).await?;
            self.history.push(message);
        }
        Ok(())
    }

    /// Record a new checkpoint at the current end of history. The new
    /// checkpoint's id is `n_checkpoints()` before the call.
    pub async fn checkpoint(&mut self, include_marker_message: bool) -> Result<(), ContextError> {
        if include_marker_message {
            self.append([Message::advisory(CHECKPOINT_MARKER)]).await?;
        }
        self.checkpoints.push(Checkpoint {
            n_messages: self.history.len(),
            token_count: self.token_count,
        });
        tracing::debug!(
            checkpoint_id = self.checkpoints.len() - 1,
            n_messages = self.history.len(),
            "checkpoint recorded"
        );
        Ok(())
    }

    /// Truncate history back to the state captured at `checkpoint_id`,
    /// discard every later checkpoint, and restore the token count recorded
    /// at that checkpoint.
    pub async fn revert_to(&mut self, checkpoint_id: usize) -> Result<(), ContextError> {
        let Some(checkpoint) = self.checkpoints.get(checkpoint_id).copied() else {
            return Err(ContextError::InvalidCheckpoint {
                id: checkpoint_id,
                n_checkpoints: self.checkpoints.len(),
            });
        };

        self.history.truncate(checkpoint.n_messages);
        self.checkpoints.truncate(checkpoint_id + 1);
        self.token_count = checkpoint.token_count;
        self.rewrite_log().await?;
        tracing::debug!(
            checkpoint_id,
            n_messages = self.history.len(),
            "context reverted"
        );
        Ok(())
    }

    /// Set the running token estimate; called after every provider response
    /// that reports usage.
    pub fn update_token_count(&mut self, n: u64) {
        self.token_count = n;
    }

    /// Up to `n` most recent message ids whose role is in `roles`,
    /// most-recent-last.
    pub fn get_recent_message_ids(&self, n: usize, roles: &[Role]) -> Vec<String> {
        let mut ids: Vec<String> = self
            .history
            .iter()
            .rev()
            .filter(|msg| roles.contains(&msg.role))
            .take(n)
            .map(|msg| msg.id.clone())
            .collect();
        ids.reverse();
        ids
    }

    async fn persist_line(&self, message: &Message) -> Result<(), ContextError> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let line = serde_json::to_string(message)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Rewrite the history log to match the retained messages after a revert.
    async fn rewrite_log(&self) -> Result<(), ContextError> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        let mut out = String::new();
        for message in &self.history {
            out.push_str(&serde_json::to_string(message)?);
            out.push('\n');
        }
        tokio::fs::write(path, out).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        Context::new(MetadataStore::new(dir.path().join("meta.jsonl")))
    }

    #[tokio::test]
    async fn checkpoint_count_tracks_calls() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        for expected in 1..=4 {
            ctx.checkpoint(false).await.unwrap();
            assert_eq!(ctx.n_checkpoints(), expected);
        }
    }

    #[tokio::test]
    async fn revert_restores_history_and_checkpoint_count() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);

        ctx.checkpoint(false).await.unwrap();
        ctx.append([Message::user("one")]).await.unwrap();
        ctx.update_token_count(10);
        ctx.checkpoint(false).await.unwrap();
        let len_at_1 = ctx.history().len();
        ctx.append([Message::assistant("two"), Message::assistant("three")])
            .await
            .unwrap();
        ctx.update_token_count(50);
        ctx.checkpoint(false).await.unwrap();

        ctx.revert_to(1).await.unwrap();
        assert_eq!(ctx.n_checkpoints(), 2);
        assert_eq!(ctx.history().len(), len_at_1);
        assert_eq!(ctx.token_count(), 10);

        ctx.checkpoint(false).await.unwrap();
        assert_eq!(ctx.n_checkpoints(), 3);
    }

    #[tokio::test]
    async fn revert_to_out_of_range_fails() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.checkpoint(false).await.unwrap();

        let err = ctx.revert_to(1).await.unwrap_err();
        assert!(matches!(
            err,
            ContextError::InvalidCheckpoint {
                id: 1,
                n_checkpoints: 1
            }
        ));
    }

    #[tokio::test]
    async fn checkpoint_marker_lands_inside_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.checkpoint(true).await.unwrap();
        assert_eq!(ctx.history().len(), 1);

        ctx.append([Message::assistant("later")]).await.unwrap();
        ctx.revert_to(0).await.unwrap();
        // The marker is part of the checkpointed state.
        assert_eq!(ctx.history().len(), 1);
        assert!(ctx.history()[0].extract_text().contains("Checkpoint boundary"));
    }

    #[tokio::test]
    async fn recent_message_ids_filters_roles_most_recent_last() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let user = Message::user("u");
        let a1 = Message::assistant("a1");
        let tool = Message::new(Role::Tool, "t");
        let a2 = Message::assistant("a2");
        ctx.append([user, a1.clone(), tool.clone(), a2.clone()])
            .await
            .unwrap();

        let ids = ctx.get_recent_message_ids(2, &[Role::Assistant, Role::Tool]);
        assert_eq!(ids, vec![tool.id, a2.id]);

        assert!(ctx.get_recent_message_ids(5, &[Role::System]).is_empty());
    }

    #[tokio::test]
    async fn file_backend_appends_and_rewrites_on_revert() {
        let dir = TempDir::new().unwrap();
        let history_path = dir.path().join("history.jsonl");
        let mut ctx = Context::with_file_backend(
            &history_path,
            MetadataStore::new(dir.path().join("meta.jsonl")),
        );

        ctx.checkpoint(false).await.unwrap();
        ctx.append([Message::user("kept")]).await.unwrap();
        ctx.checkpoint(false).await.unwrap();
        ctx.append([Message::assistant("discarded")]).await.unwrap();

        let raw = tokio::fs::read_to_string(&history_path).await.unwrap();
        assert_eq!(raw.lines().count(), 2);

        ctx.revert_to(1).await.unwrap();
        let raw = tokio::fs::read_to_string(&history_path).await.unwrap();
        assert_eq!(raw.lines().count(), 1);
        let kept: Message = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(kept.extract_text(), "kept");
    }
}
