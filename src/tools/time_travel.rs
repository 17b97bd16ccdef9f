//! The time-travel signal producer: lets the model send a dispatch to its
//! past self at an earlier checkpoint. The step loop notices the pending
//! signal after tool results are processed and replays from there.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::toolset::{InvocationScope, Tool, ToolReturn};

pub const NAME: &str = "SendDispatch";

#[derive(Debug, Deserialize)]
struct Params {
    checkpoint_id: usize,
    message: String,
}

pub struct SendDispatch;

impl Tool for SendDispatch {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Send a dispatch to your past self at an earlier checkpoint. The \
         conversation will be rewound to that checkpoint and the dispatch \
         delivered there. At most one dispatch can be sent per step."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "checkpoint_id": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "The checkpoint to rewind to"
                },
                "message": {
                    "type": "string",
                    "description": "The dispatch content delivered to your past self"
                }
            },
            "required": ["checkpoint_id", "message"]
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
                        message: format!("invalid SendDispatch parameters: {err}"),
                    };
                }
            };
            match scope.scheduler.schedule(params.checkpoint_id, params.message) {
                Ok(()) => ToolReturn::Ok {
                    output: format!(
                        "Dispatch scheduled for checkpoint {}. It will be delivered \
                         once this step completes.",
                        params.checkpoint_id
                    ),
                },
                Err(err) => ToolReturn::Error {
                    message: err.to_string(),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::metadata::MetadataStore;
    use crate::timetravel::Scheduler;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    fn scope(dir: &TempDir, n_checkpoints: usize) -> InvocationScope {
        let context = Context::new(MetadataStore::new(dir.path().join("meta.jsonl")));
        let scheduler = Scheduler::new();
        scheduler.set_n_checkpoints(n_checkpoints);
        InvocationScope::new(Arc::new(Mutex::new(context)), scheduler)
    }

    #[tokio::test]
    async fn schedules_a_pending_signal() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir, 3);

        let result = SendDispatch
            .call(
                serde_json::json!({"checkpoint_id": 1, "message": "skip that approach"}),
                &scope,
            )
            .await;
        assert!(matches!(result, ToolReturn::Ok { .. }));

        let signal = scope.scheduler.fetch_pending().unwrap();
        assert_eq!(signal.checkpoint_id, 1);
        assert_eq!(signal.payload, "skip that approach");
    }

    #[tokio::test]
    async fn rejects_unknown_checkpoint() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir, 2);

        let result = SendDispatch
            .call(
                serde_json::json!({"checkpoint_id": 7, "message": "nope"}),
                &scope,
            )
            .await;
        assert!(matches!(
            result,
            ToolReturn::Error { message } if message.contains("out of range")
        ));
        assert!(scope.scheduler.fetch_pending().is_none());
    }

    #[tokio::test]
    async fn second_dispatch_in_one_step_errors() {
        let dir = TempDir::new().unwrap();
        let scope = scope(&dir, 3);

        let args = serde_json::json!({"checkpoint_id": 0, "message": "first"});
        assert!(matches!(
            SendDispatch.call(args, &scope).await,
            ToolReturn::Ok { .. }
        ));
        let again = serde_json::json!({"checkpoint_id": 1, "message": "second"});
        assert!(matches!(
            SendDispatch.call(again, &scope).await,
            ToolReturn::Error { .. }
        ));
    }
}
