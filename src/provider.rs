//! The chat-provider boundary: one model turn in, a message plus tool calls
//! and optional usage out. Transport and marshaling live behind this trait.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};
use crate::toolset::ToolSpec;

/// Token usage reported by the provider for one response. Opaque integers;
/// this crate does no counting of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the request input, i.e. the context size going in.
    pub input: u64,
    /// Input plus output tokens for the whole turn.
    pub total: u64,
}

/// Result of one provider step: the model's message, the tool calls it
/// issued, and usage when the provider reports it.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

pub trait ChatProvider: Send + Sync {
    /// Model identifier, for status display.
    fn model_name(&self) -> &str;

    /// The provider's context window, in tokens.
    fn max_context_size(&self) -> u64;

    /// Execute one model turn over the given history.
    fn step<'a>(
        &'a self,
        system_prompt: &'a str,
        tools: &'a [ToolSpec],
        history: &'a [Message],
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, ProviderError>> + Send + 'a>>;

    /// Produce a prose summary of the history; the compaction procedure's
    /// provider contract.
    fn summarize<'a>(
        &'a self,
        history: &'a [Message],
    ) -> Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_serde_round_trip() {
        let usage = Usage {
            input: 1_200,
            total: 1_500,
        };
        let json = serde_json::to_string(&usage).unwrap();
        let parsed: Usage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, usage);
    }
}
