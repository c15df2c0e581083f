//! Builds the `session.update` envelope and waits for `session.created`
//! (spec §4.7).
//!
//! Grounded on `original_source/openai_voice/session_manager.py`: the
//! same nested `audio.input`/`audio.output` shape, and the same
//! one-second-poll retry loop bounded by a configured timeout rather than
//! blocking forever on a session that will never come up.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::BridgeConfig;
use crate::relay::connection::InboundEvent;
use crate::relay::tools::ToolDefinition;

/// Build the `session.update` message sent immediately after connecting.
pub fn build_session_update(config: &BridgeConfig, tools: &[ToolDefinition]) -> Value {
    let tools_json: Vec<Value> = tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect();
    let tool_choice = if tools_json.is_empty() { "none" } else { "auto" };

    serde_json::json!({
        "type": "session.update",
        "session": {
            "type": "realtime",
            "instructions": config.openai.instructions,
            "tools": tools_json,
            "tool_choice": tool_choice,
            "audio": {
                "input": {
                    "format": {
                        "type": config.audio.input_format,
                        "rate": config.audio.sample_rate_hz,
                    },
                    "turn_detection": {
                        "type": config.vad.r#type,
                        "create_response": config.vad.create_response,
                        "threshold": config.vad.threshold,
                        "prefix_padding_ms": config.vad.prefix_padding_ms,
                        "silence_duration_ms": config.vad.silence_duration_ms,
                    },
                },
                "output": {
                    "format": {
                        "type": config.audio.output_format,
                        "rate": config.audio.sample_rate_hz,
                    },
                    "voice": config.audio.voice,
                    "speed": config.audio.speed,
                },
            },
        },
    })
}

/// Poll the inbound channel for `session.created`, retrying once a second
/// up to `timeout_secs` total, per spec.md's session-creation timeout.
pub async fn wait_for_session_created(
    inbound_rx: &mut mpsc::Receiver<InboundEvent>,
    timeout_secs: u32,
) -> anyhow::Result<()> {
    info!("waiting for session.created");

    for attempt in 0..timeout_secs {
        let next = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv()).await;
        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => anyhow::bail!("OpenAI Realtime connection closed before session.created"),
            Err(_) => {
                info!(attempt = attempt + 1, timeout_secs, "still waiting for session.created");
                continue;
            }
        };

        let InboundEvent::Json(data) = event else {
            anyhow::bail!("OpenAI Realtime connection closed before session.created");
        };

        match data.get("type").and_then(|v| v.as_str()) {
            Some("session.created") => {
                info!("session created successfully");
                return Ok(());
            }
            Some("error") => {
                let message = data
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                error!(error = %message, "OpenAI session error during initialization");
                anyhow::bail!("session creation failed: {message}");
            }
            _ => continue,
        }
    }

    anyhow::bail!("timeout waiting for session.created")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_carries_tools_and_audio_format() {
        let config = BridgeConfig::default();
        let tools = vec![ToolDefinition {
            name: "echo".to_string(),
            description: "Echo".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let msg = build_session_update(&config, &tools);

        assert_eq!(msg["type"], "session.update");
        assert_eq!(msg["session"]["tool_choice"], "auto");
        assert_eq!(msg["session"]["tools"][0]["name"], "echo");
        assert_eq!(msg["session"]["audio"]["input"]["format"]["type"], "g711_ulaw");
        assert_eq!(msg["session"]["audio"]["output"]["voice"], "alloy");
    }

    #[test]
    fn no_tools_sets_tool_choice_none() {
        let config = BridgeConfig::default();
        let msg = build_session_update(&config, &[]);
        assert_eq!(msg["session"]["tool_choice"], "none");
        assert_eq!(msg["session"]["tools"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn wait_for_session_created_succeeds_on_first_message() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InboundEvent::Json(serde_json::json!({"type": "session.created"})))
            .await
            .unwrap();
        wait_for_session_created(&mut rx, 2).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_session_created_errors_on_error_event() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InboundEvent::Json(
            serde_json::json!({"type": "error", "error": {"message": "bad request"}}),
        ))
        .await
        .unwrap();
        let err = wait_for_session_created(&mut rx, 2).await.unwrap_err();
        assert!(err.to_string().contains("bad request"));
    }

    #[tokio::test]
    async fn wait_for_session_created_ignores_unrelated_events_then_succeeds() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InboundEvent::Json(serde_json::json!({"type": "response.created"})))
            .await
            .unwrap();
        tx.send(InboundEvent::Json(serde_json::json!({"type": "session.created"})))
            .await
            .unwrap();
        wait_for_session_created(&mut rx, 2).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_session_created_errors_when_channel_closes() {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(4);
        drop(tx);
        assert!(wait_for_session_created(&mut rx, 1).await.is_err());
    }
}
