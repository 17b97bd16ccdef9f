//! Context compaction: replace full history with a reduced form when the
//! token budget is nearly exhausted. Active pins are how specific task
//! outcomes survive; the summarization itself is the provider's job.

use std::future::Future;
use std::pin::Pin;

use crate::error::ProviderError;
use crate::message::Message;
use crate::metadata::PinRecord;
use crate::provider::ChatProvider;

pub trait Compaction: Send + Sync {
    /// Produce the replacement message sequence for the given history.
    /// The step loop installs it after `revert_to(0)` and a fresh
    /// checkpoint, so the checkpoint sequence always restarts at 0.
    fn compact<'a>(
        &'a self,
        history: &'a [Message],
        pins: &'a [PinRecord],
        provider: &'a dyn ChatProvider,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>, ProviderError>> + Send + 'a>>;
}

/// Summarize everything, then re-emit pinned messages verbatim in their
/// original history order.
pub struct SimpleCompaction;

impl Compaction for SimpleCompaction {
    fn compact<'a>(
        &'a self,
        history: &'a [Message],
        pins: &'a [PinRecord],
        provider: &'a dyn ChatProvider,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let summary = provider.summarize(history).await?;

            let pinned_ids: std::collections::HashSet<&str> = pins
                .iter()
                .flat_map(|pin| pin.message_ids.iter().map(String::as_str))
                .collect();

            let mut replacement = vec![Message::advisory(format!(
                "The conversation so far has been compacted. Summary of earlier \
                 conversation:\n\n{summary}"
            ))];
            replacement.extend(
                history
                    .iter()
                    .filter(|msg| pinned_ids.contains(msg.id.as_str()))
                    .cloned(),
            );

            tracing::info!(
                history_len = history.len(),
                pinned = replacement.len() - 1,
                "compacted context"
            );
            Ok(replacement)
        })
    }
}
