//! Tag messages for retention during context compaction.
//!
//! The agent marks specific messages as important; the pins land in the
//! metadata store and compaction preserves the pinned messages verbatim
//! while they stay within TTL.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::message::Role;
use crate::metadata::PinPolicy;
use crate::toolset::{InvocationScope, Tool, ToolReturn};

pub const NAME: &str = "TagContext";

/// How many recent assistant/tool messages to pin when the model does not
/// name explicit message ids.
const INFERRED_MESSAGE_WINDOW: usize = 5;

fn default_ttl_steps() -> u64 {
    100
}

fn default_importance() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
struct Params {
    task_id: String,
    #[serde(default)]
    policy: PinPolicy,
    #[serde(default)]
    message_ids: Option<Vec<String>>,
    #[serde(default = "default_ttl_steps")]
    ttl_steps: u64,
    #[serde(default = "default_importance")]
    importance: u8,
    #[serde(default)]
    notes: Option<String>,
}

pub struct TagContext;

impl Tool for TagContext {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Tag messages for retention during context compaction. Use 'pin_outcome' \
         to keep concise results, 'pin_process' to keep detailed process logs, \
         or 'auto' to let the runtime decide. Without explicit message_ids, the \
         most recent assistant and tool messages are tagged."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task ID these messages belong to"
                },
                "policy": {
                    "type": "string",
                    "enum": ["pin_outcome", "pin_process", "auto"],
                    "default": "pin_outcome"
                },
                "message_ids": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Message IDs to tag; inferred from recent messages when omitted"
                },
                "ttl_steps": {
                    "type": "integer",
                    "minimum": 1,
                    "default": 100,
                    "description": "Time-to-live in agent steps before this tag expires"
                },
                "importance": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 5,
                    "default": 3
                },
                "notes": {"type": "string"}
            },
            "required": ["task_id"]
        })
    }

    fn call<'a>(
        &'a self,
        arguments: serde_json::Value,
        scope: &'a InvocationScope,
    ) -> Pin<Box<dyn Future<Output = ToolReturn> + Send + 'a>> {
        Box::pin(async move {
            let params: Params = match serde_json::from_value(arguments) {
                Ok(params) => params,
                Err(err) => {
                    return ToolReturn::Error {
                        message: format!("invalid TagContext parameters: {err}"),
                    };
                }
            };
            if params.ttl_steps < 1 {
                return ToolReturn::Error {
                    message: "ttl_steps must be at least 1".into(),
                };
            }
            if !(1..=5).contains(&params.importance) {
                return ToolReturn::Error {
                    message: "importance must be between 1 and 5".into(),
                };
            }

            let context = scope.context.lock().await;
            let message_ids = match params.message_ids {
                Some(ids) => ids,
                None => {
                    let inferred = context.get_recent_message_ids(
                        INFERRED_MESSAGE_WINDOW,
                        &[Role::Assistant, Role::Tool],
                    );
                    if inferred.is_empty() {
                        return ToolReturn::Ok {
                            output: format!(
                                "No recent messages found to tag for task_id={}. \
                                 Please specify message_ids explicitly.",
                                params.task_id
                            ),
                        };
                    }
                    inferred
                }
            };

            let n_tagged = message_ids.len();
            if let Err(err) = context
                .meta()
                .tag(
                    &params.task_id,
                    message_ids,
                    params.policy,
                    params.ttl_steps,
                    params.importance,
                    params.notes.clone(),
                )
                .await
            {
                return ToolReturn::Error {
                    message: format!("failed to write pin record: {err}"),
                };
            }

            let policy_desc = match params.policy {
                PinPolicy::PinOutcome => "outcome retention (concise results)",
                PinPolicy::PinProcess => "process retention (detailed logs)",
                PinPolicy::Auto => "automatic policy selection",
            };
            let mut output = format!(
                "Tagged {n_tagged} message(s) for task_id={}\n- Policy: {policy_desc}\n- Importance: {}/5\n- TTL: {} steps",
                params.task_id, params.importance, params.ttl_steps
            );
            if let Some(notes) = &params.notes {
                output.push_str(&format!("\n- Notes: {notes}"));
            }
            ToolReturn::Ok { output }
        })
    }
}
