//! Orchestrates one call: owns the LLM connection, audio handler, audio
//! processor, and function-call processor, and runs the structured
//! concurrency loop that ties them together (spec §4.1, §3 Session).
//!
//! Grounded on `original_source/openai_voice/modular_assistant.py`'s
//! `RealTimeOpenAiVoiceAssistantV2` — the same component wiring and the
//! same `connect` → `start_conversation` → (always) `disconnect` shape,
//! collapsed into one coherent type per Open Question #1 in
//! SPEC_FULL.md rather than the base-class/concrete-subclass split the
//! Python original carries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::relay::audio_handler::{AudioHandler, AudioTransmitter};
use crate::relay::audio_processor::{AudioProcessor, ChunkOutcome, SampleFormat};
use crate::relay::connection::{InboundEvent, LlmConnection};
use crate::relay::event_router::{translate_event_type, EventDispatcher};
use crate::relay::function_call::{FunctionCallProcessor, ToolOutcome};
use crate::relay::session_init::{build_session_update, wait_for_session_created};
use crate::relay::state::VoiceAssistantState;
use crate::relay::tools::ToolRegistry;

/// Callback surface mirroring the Python original's `on_*` attributes,
/// with every method defaulted to a no-op so an observer only overrides
/// what it cares about.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_state_change(&self, _old: VoiceAssistantState, _new: VoiceAssistantState) {}
    async fn on_speech_started(&self) {}
    async fn on_speech_ended(&self) {}
    async fn on_error(&self, _message: &str) {}
}

pub struct NullObserver;

#[async_trait]
impl SessionObserver for NullObserver {}

pub struct Session {
    call_id: String,
    config: Arc<BridgeConfig>,
    state: VoiceAssistantState,
    state_tx: watch::Sender<VoiceAssistantState>,
    observer: Arc<dyn SessionObserver>,
    dispatcher: EventDispatcher,

    tool_registry: Arc<dyn ToolRegistry>,
    audio_processor: AudioProcessor,
    function_calls: FunctionCallProcessor,
    tool_outcome_rx: mpsc::Receiver<ToolOutcome>,

    tool_result_debounce: Duration,
    tool_cancel_deadline: Duration,
    session_creation_timeout_secs: u32,
}

impl Session {
    pub fn new(
        call_id: String,
        config: Arc<BridgeConfig>,
        tool_registry: Arc<dyn ToolRegistry>,
        observer: Arc<dyn SessionObserver>,
    ) -> (Self, watch::Receiver<VoiceAssistantState>) {
        let (state_tx, state_rx) = watch::channel(VoiceAssistantState::Disconnected);
        let (tool_outcome_tx, tool_outcome_rx) = mpsc::channel(32);

        let sample_format = SampleFormat {
            sample_rate_hz: config.audio.sample_rate_hz,
            bytes_per_sample: config.audio.bytes_per_sample,
        };

        let audio_processor = AudioProcessor::new(
            config.audio.streaming_mode,
            config.audio.max_memory_mb,
            config.audio.max_chunks_per_response,
            config.audio.window_size_chunks,
            config.audio.immediate_threshold_bytes,
            config.audio.window_timeout_ms,
            sample_format,
        );

        let non_blocking = true;
        let function_calls = FunctionCallProcessor::new(non_blocking, tool_registry.clone(), tool_outcome_tx);

        let session = Self {
            call_id,
            tool_result_debounce: Duration::from_millis(config.session.tool_result_debounce_ms),
            tool_cancel_deadline: Duration::from_millis(config.session.tool_cancel_deadline_ms),
            session_creation_timeout_secs: config.session.session_creation_timeout_secs,
            config,
            state: VoiceAssistantState::Disconnected,
            state_tx,
            observer,
            dispatcher: EventDispatcher::new(),
            tool_registry,
            audio_processor,
            function_calls,
            tool_outcome_rx,
        };
        (session, state_rx)
    }

    /// Expose the dispatcher so a caller can attach supplemental handlers
    /// (logging, metrics, test hooks) alongside the session's built-in
    /// event handling.
    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }

    async fn set_state(&mut self, new_state: VoiceAssistantState) {
        if self.state == new_state {
            return;
        }
        let old = self.state;
        self.state = new_state;
        let _ = self.state_tx.send(new_state);
        self.observer.on_state_change(old, new_state).await;
    }

    /// Run the full session lifecycle: connect, converse, and — no matter
    /// how the loop ends — always tear down.
    pub async fn run(
        mut self,
        mut audio_handler: AudioHandler,
        transmitter: Arc<dyn AudioTransmitter>,
        cancel: CancellationToken,
        initial_message: Option<String>,
    ) {
        let (connection, mut inbound_rx) = match self.connect().await {
            Ok(v) => v,
            Err(e) => {
                error!(call_id = %self.call_id, error = %e, "failed to connect");
                self.observer.on_error(&e.to_string()).await;
                return;
            }
        };

        if let Some(message) = initial_message {
            if let Err(e) = self.send_text_message(&connection, &message).await {
                warn!(call_id = %self.call_id, error = %e, "failed to send initial message");
            }
        }

        let pump = audio_handler.spawn_output_pump(transmitter.clone());

        self.converse(&connection, &mut inbound_rx, &mut audio_handler, &transmitter, cancel)
            .await;

        pump.abort();
        self.disconnect(connection).await;
    }

    async fn connect(&mut self) -> anyhow::Result<(LlmConnection, mpsc::Receiver<InboundEvent>)> {
        self.set_state(VoiceAssistantState::Connecting).await;

        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            BridgeError::ConfigFatal("OPENAI_API_KEY is not set; cannot connect to OpenAI Realtime".into())
        })?;
        let ping_interval = Duration::from_secs(self.config.openai.ping_interval_secs);
        let ping_timeout = Duration::from_secs(self.config.openai.ping_timeout_secs);

        let (connection, mut inbound_rx) = LlmConnection::connect(
            &api_key,
            &self.config.openai.model,
            ping_interval,
            ping_timeout,
            &self.call_id,
        )
        .await?;

        let tools = self.tool_registry.definitions();
        let session_update = build_session_update(&self.config, &tools);
        connection.send_json(session_update).await?;

        wait_for_session_created(&mut inbound_rx, self.session_creation_timeout_secs).await?;

        self.set_state(VoiceAssistantState::Connected).await;
        Ok((connection, inbound_rx))
    }

    async fn send_text_message(&self, connection: &LlmConnection, message: &str) -> anyhow::Result<()> {
        let item = serde_json::json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": message}],
            },
        });
        connection.send_json(item).await?;
        connection.send_json(serde_json::json!({"type": "response.create"})).await
    }

    async fn converse(
        &mut self,
        connection: &LlmConnection,
        inbound_rx: &mut mpsc::Receiver<InboundEvent>,
        audio_handler: &mut AudioHandler,
        transmitter: &Arc<dyn AudioTransmitter>,
        cancel: CancellationToken,
    ) {
        info!(call_id = %self.call_id, "starting conversation loop");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(call_id = %self.call_id, "session cancelled");
                    break;
                }

                audio = audio_handler.recv_input() => {
                    match audio {
                        Some(chunk) => {
                            if let Err(e) = self.send_audio_data(connection, &chunk).await {
                                warn!(call_id = %self.call_id, error = %e, "failed to send input audio");
                            }
                        }
                        None => {
                            info!(call_id = %self.call_id, "telephony audio input closed");
                            break;
                        }
                    }
                }

                event = inbound_rx.recv() => {
                    match event {
                        Some(InboundEvent::Json(value)) => {
                            self.handle_openai_event(connection, audio_handler, transmitter, value).await;
                        }
                        Some(InboundEvent::Closed { reason }) => {
                            warn!(call_id = %self.call_id, reason, "OpenAI Realtime connection lost");
                            self.set_state(VoiceAssistantState::Error).await;
                            self.observer.on_error(&format!("connection lost: {reason}")).await;
                            break;
                        }
                        None => {
                            warn!(call_id = %self.call_id, "OpenAI Realtime inbound channel closed");
                            break;
                        }
                    }
                }

                outcome = self.tool_outcome_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_tool_outcome(connection, outcome).await;
                    }
                }
            }
        }
    }

    async fn send_audio_data(&mut self, connection: &LlmConnection, audio_data: &[u8]) -> anyhow::Result<()> {
        self.audio_processor.track_input_audio(audio_data);
        let b64 = STANDARD.encode(audio_data);
        connection
            .send_json(serde_json::json!({
                "type": "input_audio_buffer.append",
                "audio": b64,
            }))
            .await
    }

    async fn handle_openai_event(
        &mut self,
        connection: &LlmConnection,
        audio_handler: &mut AudioHandler,
        transmitter: &Arc<dyn AudioTransmitter>,
        value: serde_json::Value,
    ) {
        let openai_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let internal_type = translate_event_type(&openai_type).to_string();

        self.dispatcher.route_openai_event(&openai_type, &value).await;

        match internal_type.as_str() {
            "audio_output_delta" | "audio_delta" => {
                self.handle_audio_delta(audio_handler, &value).await;
            }
            "response_done" => {
                if let Some(flushed) = self.audio_processor.finalize_response() {
                    audio_handler.enqueue_output(flushed.data);
                }
            }
            "speech_started" => {
                self.set_state(VoiceAssistantState::Listening).await;
                self.observer.on_speech_started().await;
                self.audio_processor.reset_input_timing();
                if self.audio_processor.last_assistant_item.is_some() {
                    self.interrupt_response(connection, audio_handler, transmitter).await;
                }
            }
            "speech_stopped" => {
                self.observer.on_speech_ended().await;
            }
            "function_call_arguments.delta" => {
                let call_id = value.get("call_id").and_then(|v| v.as_str()).unwrap_or_default();
                let delta = value.get("delta").and_then(|v| v.as_str()).unwrap_or_default();
                let name = value.get("name").and_then(|v| v.as_str());
                self.function_calls.handle_delta(call_id, delta, name);
            }
            "function_call_arguments.done" => {
                let call_id = value.get("call_id").and_then(|v| v.as_str()).unwrap_or_default();
                let name = value.get("name").and_then(|v| v.as_str());
                let fallback = value.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
                self.function_calls.handle_done(call_id, name, fallback).await;
            }
            "error" => {
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                error!(call_id = %self.call_id, error = %message, "OpenAI Realtime error");
                self.observer.on_error(message).await;
            }
            _ => {}
        }
    }

    async fn handle_audio_delta(&mut self, audio_handler: &mut AudioHandler, value: &serde_json::Value) {
        let Some(delta_b64) = value.get("delta").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok(audio_bytes) = STANDARD.decode(delta_b64) else {
            warn!(call_id = %self.call_id, "failed to decode audio delta");
            return;
        };
        let item_id = value.get("item_id").and_then(|v| v.as_str()).unwrap_or("unknown");

        match self.audio_processor.add_audio_chunk(audio_bytes, item_id) {
            ChunkOutcome::Flush(flushed) | ChunkOutcome::CapExceeded(flushed) => {
                audio_handler.enqueue_output(flushed.data);
            }
            ChunkOutcome::Pending => {}
        }
    }

    async fn interrupt_response(
        &mut self,
        connection: &LlmConnection,
        audio_handler: &mut AudioHandler,
        transmitter: &Arc<dyn AudioTransmitter>,
    ) {
        let audio_end_ms = self.audio_processor.calculate_interrupt_timing();
        let Some(item_id) = self.audio_processor.last_assistant_item.clone() else {
            return;
        };

        let truncate = serde_json::json!({
            "type": "conversation.item.truncate",
            "item_id": item_id,
            "content_index": 0,
            "audio_end_ms": audio_end_ms,
        });
        if let Err(e) = connection.send_json(truncate).await {
            warn!(call_id = %self.call_id, error = %e, "failed to send truncate event");
        }

        self.audio_processor.last_assistant_item = None;
        self.audio_processor.clear_accumulation();
        self.audio_processor.reset_input_timing();
        audio_handler.clear_buffers();
        if let Err(e) = transmitter.send_clear().await {
            warn!(call_id = %self.call_id, error = %e, "failed to send clear frame to telephony leg");
        }

        info!(call_id = %self.call_id, audio_end_ms, "interrupted response");
    }

    async fn handle_tool_outcome(&mut self, connection: &LlmConnection, outcome: ToolOutcome) {
        let (call_id, output, is_immediate) = match outcome {
            ToolOutcome::Result { call_id, output, is_immediate } => (call_id, output, is_immediate),
            ToolOutcome::Error { call_id, message } => {
                (call_id, serde_json::json!({"error": message}), false)
            }
        };

        let function_output = serde_json::json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": output.to_string(),
            },
        });
        if let Err(e) = connection.send_json(function_output).await {
            warn!(call_id = %self.call_id, error = %e, "failed to send function_call_output");
            return;
        }

        if !is_immediate {
            tokio::time::sleep(self.tool_result_debounce).await;
            if let Err(e) = connection.send_json(serde_json::json!({"type": "response.create"})).await {
                warn!(call_id = %self.call_id, error = %e, "failed to send response.create after tool result");
            }
        }
    }

    async fn disconnect(mut self, connection: LlmConnection) {
        self.function_calls.cancel_all_tasks(self.tool_cancel_deadline).await;
        self.audio_processor.clear_accumulation();
        self.function_calls.clear_pending_calls();
        let close_timeout = Duration::from_secs(self.config.openai.close_timeout_secs);
        connection.close(close_timeout).await;
        self.set_state(VoiceAssistantState::Disconnected).await;
        info!(call_id = %self.call_id, "session disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_transitions_publish_on_the_watch_channel() {
        let config = Arc::new(BridgeConfig::default());
        let registry = Arc::new(crate::relay::tools::BridgeToolRegistry::default());
        let (mut session, mut rx) = Session::new(
            "call_1".to_string(),
            config,
            registry,
            Arc::new(NullObserver),
        );

        assert_eq!(*rx.borrow(), VoiceAssistantState::Disconnected);
        session.set_state(VoiceAssistantState::Connecting).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), VoiceAssistantState::Connecting);
    }

    #[tokio::test]
    async fn setting_the_same_state_does_not_trigger_a_change_notification() {
        let config = Arc::new(BridgeConfig::default());
        let registry = Arc::new(crate::relay::tools::BridgeToolRegistry::default());
        let (mut session, mut rx) = Session::new(
            "call_1".to_string(),
            config,
            registry,
            Arc::new(NullObserver),
        );
        session.set_state(VoiceAssistantState::Disconnected).await;
        assert!(rx.has_changed().unwrap() == false);
    }
}
