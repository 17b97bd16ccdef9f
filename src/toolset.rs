//! The toolset boundary: tool declarations, execution of the calls a model
//! turn issued, and materialization of outcomes into history messages.
//!
//! Tools never reach for ambient globals. Each call receives an explicit
//! [`InvocationScope`] carrying the handles a tool is allowed to touch,
//! which keeps concurrent sessions isolated.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::SharedContext;
use crate::message::{Message, Role, ToolCall};
use crate::timetravel::Scheduler;

// ─── Declarations and outcomes ───────────────────────────────────────────────

/// Description of a tool for the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What one tool call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolReturn {
    Ok { output: String },
    /// The user declined the action. Ends the run successfully.
    Rejected,
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub result: ToolReturn,
}

impl ToolOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self.result, ToolReturn::Rejected)
    }
}

/// Materialize a tool outcome into its history message.
pub fn tool_outcome_to_message(outcome: &ToolOutcome) -> Message {
    let text = match &outcome.result {
        ToolReturn::Ok { output } => format!("[{}] {output}", outcome.call.name),
        ToolReturn::Rejected => format!("[{}] Rejected by user.", outcome.call.name),
        ToolReturn::Error { message } => format!("[{}] Error: {message}", outcome.call.name),
    };
    Message::new(Role::Tool, text)
}

// ─── Scoped request context ──────────────────────────────────────────────────

/// Explicit per-call handles for a tool invocation: the current tool call,
/// the session's context, and the time-travel scheduler.
#[derive(Clone)]
pub struct InvocationScope {
    pub context: SharedContext,
    pub scheduler: Scheduler,
    pub call: Option<ToolCall>,
}

impl InvocationScope {
    pub fn new(context: SharedContext, scheduler: Scheduler) -> Self {
        Self {
            context,
            scheduler,
            call: None,
        }
    }

    pub fn for_call(&self, call: &ToolCall) -> Self {
        Self {
            context: Arc::clone(&self.context),
            scheduler: self.scheduler.clone(),
            call: Some(call.clone()),
        }
    }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    fn call<'a>(
        &'a self,
        arguments: serde_json::Value,
        scope: &'a InvocationScope,
    ) -> Pin<Box<dyn Future<Output = ToolReturn> + Send + 'a>>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Executes the tool calls one model turn issued. Outcomes come back in
/// issue order, and all of them complete before the loop proceeds.
pub trait Toolset: Send + Sync {
    fn specs(&self) -> Vec<ToolSpec>;

    fn has_tool(&self, name: &str) -> bool {
        self.specs().iter().any(|spec| spec.name == name)
    }

    fn execute<'a>(
        &'a self,
        calls: &'a [ToolCall],
        scope: &'a InvocationScope,
    ) -> Pin<Box<dyn Future<Output = Vec<ToolOutcome>> + Send + 'a>>;
}

// ─── Registry-backed toolset ─────────────────────────────────────────────────

/// Runs registered tools sequentially, in the order the calls were issued.
#[derive(Default)]
pub struct SimpleToolset {
    tools: Vec<Arc<dyn Tool>>,
}

impl SimpleToolset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }
}

impl Toolset for SimpleToolset {
    fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|tool| tool.spec()).collect()
    }

    fn execute<'a>(
        &'a self,
        calls: &'a [ToolCall],
        scope: &'a InvocationScope,
    ) -> Pin<Box<dyn Future<Output = Vec<ToolOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                let result = match self.find(&call.name) {
                    Some(tool) => {
                        let call_scope = scope.for_call(call);
                        tool.call(call.arguments.clone(), &call_scope).await
                    }
                    None => ToolReturn::Error {
                        message: format!("unknown tool: {}", call.name),
                    },
                };
                outcomes.push(ToolOutcome {
                    call: call.clone(),
                    result,
                });
            }
            outcomes
        })
    }
}
