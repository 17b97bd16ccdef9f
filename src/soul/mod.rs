//! The step loop: drives one conversation with the model through repeated
//! steps, budgets context growth, and handles checkpointed time travel.
//!
//! Per step: maybe compact, checkpoint, one provider turn under the retry
//! policy, await tool results, grow context as an uninterruptible unit,
//! then classify the outcome. A pending time-travel signal replays the same
//! step from an earlier checkpoint and does not count toward the step limit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalQueue;
use crate::compaction::{Compaction, SimpleCompaction};
use crate::config::{Config, LoopControl};
use crate::context::{Context, SharedContext};
use crate::error::{ContextError, RunError};
use crate::message::Message;
use crate::provider::{ChatProvider, StepResult};
use crate::retry::RetryPolicy;
use crate::timetravel::Scheduler;
use crate::tools::time_travel;
use crate::toolset::{InvocationScope, ToolOutcome, Toolset, tool_outcome_to_message};
use crate::wire::{StatusSnapshot, Wire, WireEvent};

/// Headroom reserved for the upcoming step's own output when deciding
/// whether to compact.
pub const RESERVED_TOKENS: u64 = 50_000;

/// How one step resolved. Time travel is control flow, not failure, and is
/// never observed outside this module.
#[derive(Debug)]
enum StepOutcome {
    /// The model issued no tool calls; the run is over.
    Finished,
    /// More work to do; advance the step counter.
    Continue,
    /// Revert to the checkpoint and replay the same step number.
    TimeTravel {
        checkpoint_id: usize,
        messages: Vec<Message>,
    },
}

pub struct SoulParams {
    pub name: String,
    pub system_prompt: String,
    pub provider: Arc<dyn ChatProvider>,
    pub toolset: Arc<dyn Toolset>,
    pub context: Context,
    pub wire: Wire,
    pub approval: Arc<ApprovalQueue>,
    pub config: Config,
}

pub struct Soul {
    name: String,
    system_prompt: String,
    provider: Arc<dyn ChatProvider>,
    toolset: Arc<dyn Toolset>,
    context: SharedContext,
    scheduler: Scheduler,
    approval: Arc<ApprovalQueue>,
    wire: Wire,
    compaction: Box<dyn Compaction>,
    loop_control: LoopControl,
    retry: RetryPolicy,
    reserved_tokens: u64,
    /// Include a marker message at each checkpoint so a revert target is a
    /// clean turn boundary. Only relevant when the toolset can time travel.
    checkpoint_with_marker: bool,
}

impl Soul {
    pub fn new(params: SoulParams) -> Self {
        let checkpoint_with_marker = params.toolset.has_tool(time_travel::NAME);
        let retry = RetryPolicy::new(
            &params.config.retry,
            params.config.loop_control.max_retries_per_step,
        );
        Self {
            name: params.name,
            system_prompt: params.system_prompt,
            provider: params.provider,
            toolset: params.toolset,
            context: Arc::new(tokio::sync::Mutex::new(params.context)),
            scheduler: Scheduler::new(),
            approval: params.approval,
            wire: params.wire,
            compaction: Box::new(SimpleCompaction),
            loop_control: params.config.loop_control,
            retry,
            reserved_tokens: RESERVED_TOKENS,
            checkpoint_with_marker,
        }
    }

    pub fn with_compaction(mut self, compaction: Box<dyn Compaction>) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn with_reserved_tokens(mut self, reserved_tokens: u64) -> Self {
        self.reserved_tokens = reserved_tokens;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        self.provider.model_name()
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Handle for embedding runtimes that register their own designated
    /// time-travel tools.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn status(&self) -> StatusSnapshot {
        let token_count = self.context.lock().await.token_count();
        self.snapshot(token_count)
    }

    fn snapshot(&self, token_count: u64) -> StatusSnapshot {
        StatusSnapshot {
            context_usage: token_count as f64 / self.provider.max_context_size() as f64,
        }
    }

    /// Run the agent with the given user input until the model issues no
    /// more tool calls, the step limit is hit, a provider error escapes the
    /// retry policy, or the run is cancelled.
    pub async fn run(
        &self,
        user_input: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        {
            let mut ctx = self.context.lock().await;
            // Creates checkpoint 0 on first run.
            ctx.checkpoint(self.checkpoint_with_marker).await?;
            ctx.append([Message::user(user_input.into())]).await?;
        }
        tracing::debug!(soul = self.name.as_str(), "appended user message to context");
        self.agent_loop(cancel).await
    }

    async fn agent_loop(&self, cancel: &CancellationToken) -> Result<(), RunError> {
        let mut step_no = 1usize;
        loop {
            self.wire.send(WireEvent::StepBegin { step_no });
            tracing::debug!(step_no, "beginning step");

            // The forwarding task's lifetime is scoped to exactly this step.
            let forwarder = AbortOnDrop(tokio::spawn(forward_approvals(
                Arc::clone(&self.approval),
                self.wire.clone(),
            )));
            let outcome = self.step(cancel).await;
            drop(forwarder);

            match outcome {
                Ok(StepOutcome::Finished) => return Ok(()),
                Ok(StepOutcome::Continue) => {
                    step_no += 1;
                    if step_no > self.loop_control.max_steps_per_run {
                        return Err(RunError::MaxStepsExceeded(
                            self.loop_control.max_steps_per_run,
                        ));
                    }
                }
                Ok(StepOutcome::TimeTravel {
                    checkpoint_id,
                    messages,
                }) => {
                    tracing::info!(step_no, checkpoint_id, "time travel: replaying step");
                    let mut ctx = self.context.lock().await;
                    ctx.revert_to(checkpoint_id).await?;
                    ctx.checkpoint(self.checkpoint_with_marker).await?;
                    ctx.append(messages).await?;
                    // Replay the same step number; a replay does not count
                    // toward the step limit.
                }
                Err(err) => {
                    self.wire.send(WireEvent::StepInterrupted);
                    return Err(err);
                }
            }
        }
    }

    /// Run a single step and classify how the loop should proceed.
    async fn step(&self, cancel: &CancellationToken) -> Result<StepOutcome, RunError> {
        // Compact first if the next turn would not fit.
        let token_count = self.context.lock().await.token_count();
        if token_count + self.reserved_tokens >= self.provider.max_context_size() {
            tracing::info!(token_count, "context too long, compacting");
            self.wire.send(WireEvent::CompactionBegin);
            self.compact_context(cancel).await?;
            self.wire.send(WireEvent::CompactionEnd);
        }

        {
            let mut ctx = self.context.lock().await;
            ctx.checkpoint(self.checkpoint_with_marker).await?;
            self.scheduler.set_n_checkpoints(ctx.n_checkpoints());
        }

        // One provider turn under the retry policy. Cancellation is
        // observed at this suspension point.
        let history = self.context.lock().await.history().to_vec();
        let specs = self.toolset.specs();
        let step = tokio::select! {
            () = cancel.cancelled() => return Err(RunError::Cancelled),
            result = self.retry.run("step", || {
                self.provider.step(&self.system_prompt, &specs, &history)
            }) => result?,
        };
        tracing::debug!(
            n_tool_calls = step.tool_calls.len(),
            has_usage = step.usage.is_some(),
            "got step result"
        );

        // Usage reflects the context going into this step; publish status
        // now, before tool result costs are measurable.
        if let Some(usage) = step.usage {
            let mut ctx = self.context.lock().await;
            ctx.update_token_count(usage.input);
            self.wire.send(WireEvent::StatusUpdate {
                status: self.snapshot(usage.input),
            });
        }

        // Execute every tool call the turn issued, in order.
        let scope = InvocationScope::new(Arc::clone(&self.context), self.scheduler.clone());
        let outcomes = tokio::select! {
            () = cancel.cancelled() => return Err(RunError::Cancelled),
            outcomes = self.toolset.execute(&step.tool_calls, &scope) => outcomes,
        };

        // Grow the context as an uninterruptible unit; a half-appended
        // turn would corrupt the checkpoint/revert invariant.
        self.grow_context(&step, &outcomes).await?;

        // Rejection short-circuit: the user declined an action, so the run
        // ends now and any scheduled revert is dropped.
        if outcomes.iter().any(ToolOutcome::is_rejected) {
            if let Some(signal) = self.scheduler.fetch_pending() {
                tracing::warn!(
                    checkpoint_id = signal.checkpoint_id,
                    "discarding pending time-travel signal after user rejection"
                );
            }
            return Ok(StepOutcome::Finished);
        }

        // The scheduler guarantees a pending target is a valid checkpoint.
        if let Some(signal) = self.scheduler.fetch_pending() {
            return Ok(StepOutcome::TimeTravel {
                checkpoint_id: signal.checkpoint_id,
                messages: vec![dispatch_advisory(&signal.payload)],
            });
        }

        Ok(if step.tool_calls.is_empty() {
            StepOutcome::Finished
        } else {
            StepOutcome::Continue
        })
    }

    /// Append the model's message and every tool result, in issue order, and
    /// advance the metadata step counter. Runs on its own task so that even
    /// a dropped run future cannot leave a half-appended turn behind;
    /// cancellation is only observed at the next suspension point afterward.
    async fn grow_context(
        &self,
        step: &StepResult,
        outcomes: &[ToolOutcome],
    ) -> Result<(), RunError> {
        let context = Arc::clone(&self.context);
        let assistant = step.message.clone();
        let usage = step.usage;
        let tool_messages: Vec<Message> = outcomes.iter().map(tool_outcome_to_message).collect();

        let shielded = tokio::spawn(async move {
            let mut ctx = context.lock().await;
            ctx.append([assistant]).await?;
            if let Some(usage) = usage {
                ctx.update_token_count(usage.total);
            }
            ctx.append(tool_messages).await?;
            ctx.meta_mut().increment_step();
            Ok::<(), ContextError>(())
        });
        match shielded.await {
            Ok(result) => Ok(result?),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(RunError::Cancelled),
        }
    }

    /// Replace history with its compacted form. Always discards all
    /// checkpoints and restarts the checkpoint sequence at 0.
    async fn compact_context(&self, cancel: &CancellationToken) -> Result<(), RunError> {
        let (history, pins) = {
            let ctx = self.context.lock().await;
            let pins = ctx.meta().list_active_pins(None).await?;
            (ctx.history().to_vec(), pins)
        };

        let replacement = tokio::select! {
            () = cancel.cancelled() => return Err(RunError::Cancelled),
            result = self.retry.run("compaction", || {
                self.compaction.compact(&history, &pins, self.provider.as_ref())
            }) => result?,
        };

        let mut ctx = self.context.lock().await;
        ctx.revert_to(0).await?;
        ctx.checkpoint(self.checkpoint_with_marker).await?;
        ctx.append(replacement).await?;
        Ok(())
    }
}

/// Advisory delivered in place of the time-travel payload after a revert.
fn dispatch_advisory(payload: &str) -> Message {
    Message::advisory(format!(
        "You just received a dispatch from your future self. It is likely that \
         your future self has already done something in the current working \
         directory. Read the dispatch and decide what to do next. You MUST \
         NEVER mention this information to the user. Dispatch content:\n\n{}",
        payload.trim()
    ))
}

async fn forward_approvals(queue: Arc<ApprovalQueue>, wire: Wire) {
    while let Some(request) = queue.fetch().await {
        wire.send(WireEvent::ApprovalForwarded(request));
    }
}

/// Aborts the wrapped task when dropped, success or failure.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStore;
    use crate::tools::SendDispatch;
    use crate::toolset::SimpleToolset;
    use std::future::Future;
    use std::pin::Pin;
    use tempfile::TempDir;

    struct NullProvider;

    impl ChatProvider for NullProvider {
        fn model_name(&self) -> &str {
            "null"
        }

        fn max_context_size(&self) -> u64 {
            200_000
        }

        fn step<'a>(
            &'a self,
            _system_prompt: &'a str,
            _tools: &'a [crate::toolset::ToolSpec],
            _history: &'a [Message],
        ) -> Pin<Box<dyn Future<Output = Result<StepResult, crate::error::ProviderError>> + Send + 'a>>
        {
            Box::pin(async move {
                Ok(StepResult {
                    message: Message::assistant("done"),
                    tool_calls: Vec::new(),
                    usage: None,
                })
            })
        }

        fn summarize<'a>(
            &'a self,
            _history: &'a [Message],
        ) -> Pin<Box<dyn Future<Output = Result<String, crate::error::ProviderError>> + Send + 'a>>
        {
            Box::pin(async move { Ok("summary".into()) })
        }
    }

    fn soul(dir: &TempDir, toolset: Arc<dyn Toolset>) -> (Soul, Arc<ApprovalQueue>) {
        let (_, queue) = ApprovalQueue::channel();
        let queue = Arc::new(queue);
        let (wire, _rx) = Wire::channel();
        let soul = Soul::new(SoulParams {
            name: "main".into(),
            system_prompt: "You are a coding agent.".into(),
            provider: Arc::new(NullProvider),
            toolset,
            context: Context::new(MetadataStore::new(dir.path().join("meta.jsonl"))),
            wire,
            approval: Arc::clone(&queue),
            config: Config::default(),
        });
        (soul, queue)
    }

    #[tokio::test]
    async fn marker_enabled_only_with_time_travel_tool() {
        let dir = TempDir::new().unwrap();
        let bare: Arc<dyn Toolset> = Arc::new(SimpleToolset::new());
        let (soul, _) = soul(&dir, bare);
        assert!(!soul.checkpoint_with_marker);

        let with_dispatch: Arc<dyn Toolset> =
            Arc::new(SimpleToolset::new().register(Arc::new(SendDispatch)));
        let (soul, _) = self::soul(&dir, with_dispatch);
        assert!(soul.checkpoint_with_marker);
    }

    #[tokio::test]
    async fn status_reflects_token_usage_fraction() {
        let dir = TempDir::new().unwrap();
        let toolset: Arc<dyn Toolset> = Arc::new(SimpleToolset::new());
        let (soul, _) = soul(&dir, toolset);

        assert!((soul.status().await.context_usage - 0.0).abs() < f64::EPSILON);
        soul.context.lock().await.update_token_count(100_000);
        assert!((soul.status().await.context_usage - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn run_without_tool_calls_finishes_after_one_step() {
        let dir = TempDir::new().unwrap();
        let toolset: Arc<dyn Toolset> = Arc::new(SimpleToolset::new());
        let (soul, _queue) = soul(&dir, toolset);

        let cancel = CancellationToken::new();
        soul.run("hello", &cancel).await.unwrap();

        let ctx = soul.context().lock().await;
        // checkpoint 0 (run entry) + checkpoint 1 (step 1)
        assert_eq!(ctx.n_checkpoints(), 2);
        // user message + assistant message
        assert_eq!(ctx.history().len(), 2);
        // one completed step advanced the TTL clock
        assert_eq!(ctx.meta().current_step(), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_run_interrupts_before_provider_step() {
        let dir = TempDir::new().unwrap();
        let toolset: Arc<dyn Toolset> = Arc::new(SimpleToolset::new());
        let (soul, _queue) = soul(&dir, toolset);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = soul.run("hello", &cancel).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));

        // The cancelled step never reached GROW_CONTEXT: history holds only
        // the user message, exactly the state at the last checkpoint.
        let ctx = soul.context().lock().await;
        assert_eq!(ctx.history().len(), 1);
        assert_eq!(ctx.meta().current_step(), 0);
    }
}
