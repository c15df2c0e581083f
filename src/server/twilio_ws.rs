//! Twilio Media Streams WebSocket handler (spec §4.3, §6 Telephony Leg).
//!
//! Grounded on `original_source/managers/twilio_manager.py`'s
//! `TwilioConnectionManager.handle_media_stream` for the event-dispatch
//! shape (`start`/`media`/`mark`/`stop`), and on
//! `other_examples/…dnacenta-voice-echo…twilio-media.rs`'s `StreamEvent`
//! enum plus outbound-channel-and-`select!` loop for the idiomatic axum
//! plumbing — the outbound channel gives this leg the same
//! single-writer-per-socket discipline `relay::connection` gives the
//! OpenAI leg.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::relay::{
    AudioHandler, AudioTransmitter, CallId, InboundAudioPort, MarkCounter, Session, SessionHandle, SessionObserver,
};
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum StreamEvent {
    Connected,
    Start { start: StartMetadata },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    Stop,
}

#[derive(Debug, Deserialize)]
struct StartMetadata {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid", default)]
    call_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct MarkPayload {
    name: String,
}

pub async fn handle_media_upgrade(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_media_stream(socket, state))
}

/// Frames outbound audio as Twilio `media`/`mark`/`clear` events and
/// funnels them through a channel so the single socket-reading task is
/// also the only socket-writing task.
struct TwilioTransmitter {
    stream_sid: Mutex<Option<String>>,
    /// `media.timestamp` from the most recently received inbound frame,
    /// milliseconds since the telephony stream started (spec §3
    /// StreamBinding, §6 `media` handler).
    latest_media_timestamp: Mutex<Option<String>>,
    outbound_tx: mpsc::Sender<Message>,
}

impl TwilioTransmitter {
    fn frame(&self, event: &str, extra: serde_json::Value) -> Option<Message> {
        let stream_sid = self.stream_sid.lock().unwrap().clone()?;
        let mut body = serde_json::json!({ "event": event, "streamSid": stream_sid });
        if let serde_json::Value::Object(extra) = extra {
            body.as_object_mut().unwrap().extend(extra);
        }
        Some(Message::Text(body.to_string().into()))
    }
}

#[async_trait]
impl AudioTransmitter for TwilioTransmitter {
    async fn send_media(&self, payload_b64: String) -> anyhow::Result<()> {
        let Some(msg) = self.frame("media", serde_json::json!({ "media": { "payload": payload_b64 } })) else {
            return Ok(());
        };
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("telephony outbound channel closed"))
    }

    async fn send_mark(&self, name: &str) -> anyhow::Result<()> {
        let Some(msg) = self.frame("mark", serde_json::json!({ "mark": { "name": name } })) else {
            return Ok(());
        };
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("telephony outbound channel closed"))
    }

    async fn send_clear(&self) -> anyhow::Result<()> {
        let Some(msg) = self.frame("clear", serde_json::json!({})) else {
            return Ok(());
        };
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("telephony outbound channel closed"))
    }
}

struct NoopObserver;

#[async_trait]
impl SessionObserver for NoopObserver {}

async fn handle_media_stream(mut socket: WebSocket, state: ServerState) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
    let transmitter = Arc::new(TwilioTransmitter {
        stream_sid: Mutex::new(None),
        latest_media_timestamp: Mutex::new(None),
        outbound_tx,
    });

    let mut audio_handler = Some(AudioHandler::new(state.config.audio.queue_depth));
    let handler_ref = audio_handler.as_ref().unwrap();
    let input_port: InboundAudioPort = handler_ref.inbound_port();
    let mark_counter: MarkCounter = handler_ref.mark_counter();

    let mut call_id: Option<CallId> = None;
    let cancel = CancellationToken::new();
    let mut session_task: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;

            Some(msg) = outbound_rx.recv() => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }

            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break; };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<StreamEvent>(&text) {
                        Ok(StreamEvent::Connected) => {
                            info!("Twilio media stream connected");
                        }
                        Ok(StreamEvent::Start { start }) => {
                            *transmitter.stream_sid.lock().unwrap() = Some(start.stream_sid.clone());
                            let id = CallId(start.call_sid.unwrap_or(start.stream_sid));
                            info!(call_id = %id, "Twilio media stream started");

                            let (session, state_rx) = Session::new(
                                id.to_string(),
                                state.config.clone(),
                                state.tools.clone(),
                                Arc::new(NoopObserver),
                            );
                            state
                                .registry
                                .insert(
                                    id.clone(),
                                    SessionHandle {
                                        cancel: cancel.clone(),
                                        state_rx,
                                    },
                                )
                                .await;

                            let Some(handler) = audio_handler.take() else {
                                warn!(call_id = %id, "duplicate start event, ignoring");
                                continue;
                            };
                            let greeting = state.config.twilio.greeting_message.clone();
                            let transmitter_for_session: Arc<dyn AudioTransmitter> = transmitter.clone();
                            let session_cancel = cancel.clone();
                            session_task = Some(tokio::spawn(session.run(
                                handler,
                                transmitter_for_session,
                                session_cancel,
                                Some(greeting),
                            )));

                            call_id = Some(id);
                        }
                        Ok(StreamEvent::Media { media }) => {
                            *transmitter.latest_media_timestamp.lock().unwrap() = Some(media.timestamp.clone());
                            input_port.push_b64(&media.payload);
                        }
                        Ok(StreamEvent::Mark { mark: _ }) => {
                            mark_counter.record_acked();
                        }
                        Ok(StreamEvent::Stop) => {
                            info!("Twilio media stream stopped");
                            break;
                        }
                        Err(e) => warn!(error = %e, "failed to parse Twilio stream event"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    cancel.cancel();
    if let Some(task) = session_task {
        let _ = task.await;
    }
    if let Some(id) = call_id {
        state.registry.remove(&id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_event_parses_call_sid_and_stream_sid() {
        let raw = r#"{"event":"start","start":{"streamSid":"MZ123","callSid":"CA456"}}"#;
        match serde_json::from_str::<StreamEvent>(raw).unwrap() {
            StreamEvent::Start { start } => {
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.call_sid.as_deref(), Some("CA456"));
            }
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn media_event_carries_the_base64_payload_and_timestamp() {
        let raw = r#"{"event":"media","media":{"payload":"abcd","timestamp":"20"}}"#;
        match serde_json::from_str::<StreamEvent>(raw).unwrap() {
            StreamEvent::Media { media } => {
                assert_eq!(media.payload, "abcd");
                assert_eq!(media.timestamp, "20");
            }
            other => panic!("expected Media, got {other:?}"),
        }
    }
}
