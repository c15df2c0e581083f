//! Accumulates streamed function-call arguments and executes tools,
//! non-blocking by default (spec §4.5).
//!
//! Grounded on `original_source/openai_voice/function_call_processor.py`:
//! the `pending_function_calls` accumulation-by-`call_id` map and the
//! immediate "executing" acknowledgment followed by a backgrounded
//! `asyncio.create_task` carry over directly, with `asyncio.Task` replaced
//! by a `tokio::task::JoinSet` so teardown can cancel-and-await every
//! outstanding tool call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::tools::ToolRegistry;

#[derive(Debug, Default)]
struct PendingCall {
    arguments: String,
    name: Option<String>,
}

/// What the session should do in response to a tool outcome.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// Send a `function_call_output` with this JSON body, then — unless
    /// `is_immediate` — debounce and send `response.create`.
    Result {
        call_id: String,
        output: serde_json::Value,
        is_immediate: bool,
    },
    Error { call_id: String, message: String },
}

pub struct FunctionCallProcessor {
    non_blocking: bool,
    pending: HashMap<String, PendingCall>,
    active_tasks: JoinSet<()>,
    registry: Arc<dyn ToolRegistry>,
    outcome_tx: mpsc::Sender<ToolOutcome>,
}

impl FunctionCallProcessor {
    pub fn new(
        non_blocking: bool,
        registry: Arc<dyn ToolRegistry>,
        outcome_tx: mpsc::Sender<ToolOutcome>,
    ) -> Self {
        Self {
            non_blocking,
            pending: HashMap::new(),
            active_tasks: JoinSet::new(),
            registry,
            outcome_tx,
        }
    }

    /// `response.function_call_arguments.delta`
    pub fn handle_delta(&mut self, call_id: &str, delta: &str, name: Option<&str>) {
        let entry = self.pending.entry(call_id.to_string()).or_default();
        entry.arguments.push_str(delta);
        if let Some(n) = name {
            entry.name = Some(n.to_string());
        }
    }

    /// `response.function_call_arguments.done` — resolve the tool, ack
    /// immediately if non-blocking, and execute.
    pub async fn handle_done(&mut self, call_id: &str, name: Option<&str>, fallback_arguments: &str) {
        let (arguments_str, resolved_name) = match self.pending.remove(call_id) {
            Some(pending) => (pending.arguments, name.map(str::to_string).or(pending.name)),
            None => (fallback_arguments.to_string(), name.map(str::to_string)),
        };

        let Some(function_name) = resolved_name else {
            let _ = self
                .outcome_tx
                .send(ToolOutcome::Error {
                    call_id: call_id.to_string(),
                    message: "function call done without a name".to_string(),
                })
                .await;
            return;
        };

        if !self.registry.has_tool(&function_name) {
            error!(tool = %function_name, "unknown function");
            let _ = self
                .outcome_tx
                .send(ToolOutcome::Error {
                    call_id: call_id.to_string(),
                    message: format!("Unknown function: {function_name}"),
                })
                .await;
            return;
        }

        let arguments: serde_json::Value = match serde_json::from_str(&arguments_str) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "invalid JSON in function arguments");
                let _ = self
                    .outcome_tx
                    .send(ToolOutcome::Error {
                        call_id: call_id.to_string(),
                        message: format!("Invalid JSON: {e}"),
                    })
                    .await;
                return;
            }
        };

        self.execute(function_name, arguments, call_id.to_string()).await;
    }

    async fn execute(&mut self, tool_name: String, arguments: serde_json::Value, call_id: String) {
        info!(tool = %tool_name, call_id = %call_id, "function call completed, executing");

        if self.non_blocking {
            let _ = self
                .outcome_tx
                .send(ToolOutcome::Result {
                    call_id: call_id.clone(),
                    output: serde_json::json!({
                        "status": "executing",
                        "message": format!(
                            "Working on {tool_name} for you. I'll have the result shortly and will let you know!"
                        ),
                    }),
                    is_immediate: true,
                })
                .await;

            let registry = self.registry.clone();
            let outcome_tx = self.outcome_tx.clone();
            self.active_tasks.spawn(async move {
                match registry.call(&tool_name, arguments).await {
                    Ok(result) => {
                        let _ = outcome_tx
                            .send(ToolOutcome::Result {
                                call_id,
                                output: result,
                                is_immediate: false,
                            })
                            .await;
                    }
                    Err(e) => {
                        let _ = outcome_tx
                            .send(ToolOutcome::Error {
                                call_id,
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            });
        } else {
            match self.registry.call(&tool_name, arguments).await {
                Ok(result) => {
                    let _ = self
                        .outcome_tx
                        .send(ToolOutcome::Result {
                            call_id,
                            output: result,
                            is_immediate: false,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = self
                        .outcome_tx
                        .send(ToolOutcome::Error {
                            call_id,
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
    }

    pub fn clear_pending_calls(&mut self) {
        self.pending.clear();
    }

    /// Cancel and await every outstanding background tool task, bounded by
    /// `deadline` so teardown can never hang on a stuck tool.
    pub async fn cancel_all_tasks(&mut self, deadline: Duration) {
        if self.active_tasks.is_empty() {
            return;
        }
        self.active_tasks.abort_all();
        let drain = async {
            while self.active_tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("tool task cancellation exceeded its deadline, abandoning remainder");
        }
    }

    pub fn active_task_count(&self) -> usize {
        self.active_tasks.len()
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::tools::BridgeToolRegistry;

    fn processor() -> (FunctionCallProcessor, mpsc::Receiver<ToolOutcome>) {
        let (tx, rx) = mpsc::channel(16);
        let p = FunctionCallProcessor::new(true, Arc::new(BridgeToolRegistry::default()), tx);
        (p, rx)
    }

    #[test]
    fn delta_accumulates_arguments_by_call_id() {
        let (mut p, _rx) = processor();
        p.handle_delta("call_1", "{\"mess", Some("echo"));
        p.handle_delta("call_1", "age\": \"hi\"}", None);
        assert_eq!(p.pending.get("call_1").unwrap().arguments, "{\"message\": \"hi\"}");
        assert_eq!(p.pending.get("call_1").unwrap().name.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn non_blocking_done_sends_immediate_ack_then_final_result() {
        let (mut p, mut rx) = processor();
        p.handle_delta("call_1", "{\"message\": \"hi\"}", Some("echo"));
        p.handle_done("call_1", None, "{}").await;

        let first = rx.recv().await.unwrap();
        match first {
            ToolOutcome::Result { is_immediate, .. } => assert!(is_immediate),
            other => panic!("expected immediate ack, got {other:?}"),
        }

        let second = rx.recv().await.unwrap();
        match second {
            ToolOutcome::Result { output, is_immediate, .. } => {
                assert!(!is_immediate);
                assert_eq!(output["echo"], "hi");
            }
            other => panic!("expected final result, got {other:?}"),
        }
        assert!(p.pending.is_empty());
    }

    #[tokio::test]
    async fn unknown_function_reports_error() {
        let (mut p, mut rx) = processor();
        p.handle_done("call_1", Some("delete_everything"), "{}").await;
        match rx.recv().await.unwrap() {
            ToolOutcome::Error { message, .. } => assert!(message.contains("Unknown function")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_json_arguments_report_error_without_panicking() {
        let (mut p, mut rx) = processor();
        p.handle_done("call_1", Some("echo"), "{not json").await;
        match rx.recv().await.unwrap() {
            ToolOutcome::Error { message, .. } => assert!(message.contains("Invalid JSON")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_all_tasks_is_idempotent_on_empty_set() {
        let (mut p, _rx) = processor();
        p.cancel_all_tasks(Duration::from_millis(50)).await;
        assert_eq!(p.active_task_count(), 0);
    }
}
