//! WebSocket client for the OpenAI Realtime API (spec §4.2).
//!
//! Grounded on `original_source/openai_voice/connection_manager.py` for
//! the connect/keepalive/send/receive shape and on
//! `other_examples/…Kimjaechol-MoA…openai_realtime.rs` for the idiomatic
//! `tokio_tungstenite` plumbing: a client request built via
//! `IntoClientRequest` with the `Authorization`/`OpenAI-Beta` headers, a
//! split sink/stream, and separate spawned outbound/inbound loops so a
//! slow reader can never block a writer or vice versa.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

const REALTIME_WS_URL: &str = "wss://api.openai.com/v1/realtime";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug)]
enum OutboundMessage {
    Json(Value),
    Close,
}

/// What the inbound loop hands back to the caller.
#[derive(Debug)]
pub enum InboundEvent {
    Json(Value),
    /// The socket closed or errored; the connection is no longer usable.
    Closed { reason: String },
}

/// A live connection to the OpenAI Realtime API.
///
/// All writes funnel through a single `outbound_loop` task reading from
/// `outbound_tx`, so callers never interleave frames on the socket (spec
/// §5's single-writer-per-socket discipline).
pub struct LlmConnection {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    keepalive: tokio::task::JoinHandle<()>,
    outbound_task: tokio::task::JoinHandle<()>,
    inbound_task: tokio::task::JoinHandle<()>,
}

impl LlmConnection {
    pub async fn connect(
        api_key: &str,
        model: &str,
        ping_interval: Duration,
        ping_timeout: Duration,
        call_id: &str,
    ) -> anyhow::Result<(Self, mpsc::Receiver<InboundEvent>)> {
        let url = format!("{REALTIME_WS_URL}?model={model}");

        info!(call_id = %call_id, model, "connecting to OpenAI Realtime");

        let mut request = url
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("failed to build OpenAI Realtime request: {e}"))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {api_key}")
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid Authorization header: {e}"))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid OpenAI-Beta header: {e}"))?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to OpenAI Realtime: {e}"))?;

        let (sink, source) = ws_stream.split();
        let sink = Arc::new(Mutex::new(sink));

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(256);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(256);
        let (pong_tx, pong_rx) = watch::channel(Instant::now());

        let outbound_task = {
            let sink = sink.clone();
            let call_id = call_id.to_string();
            tokio::spawn(async move { outbound_loop(outbound_rx, sink, call_id).await })
        };

        let inbound_task = {
            let call_id = call_id.to_string();
            let inbound_tx_for_loop = inbound_tx.clone();
            tokio::spawn(async move { inbound_loop(source, inbound_tx_for_loop, pong_tx, call_id).await })
        };

        let keepalive = {
            let sink = sink.clone();
            let call_id = call_id.to_string();
            tokio::spawn(async move {
                keepalive_loop(sink, inbound_tx, pong_rx, ping_interval, ping_timeout, call_id).await
            })
        };

        info!(call_id = %call_id, "connected to OpenAI Realtime");

        Ok((
            Self {
                outbound_tx,
                keepalive,
                outbound_task,
                inbound_task,
            },
            inbound_rx,
        ))
    }

    pub async fn send_json(&self, value: Value) -> anyhow::Result<()> {
        self.outbound_tx
            .send(OutboundMessage::Json(value))
            .await
            .map_err(|_| BridgeError::ConnectionLost("OpenAI Realtime outbound channel closed".into()).into())
    }

    /// Close the connection and await every spawned loop, up to
    /// `close_timeout` for a clean handshake before giving up.
    pub async fn close(self, close_timeout: Duration) {
        let _ = self.outbound_tx.send(OutboundMessage::Close).await;
        self.keepalive.abort();
        let wait_for_loops = async {
            let _ = self.outbound_task.await;
            let _ = self.inbound_task.await;
        };
        if tokio::time::timeout(close_timeout, wait_for_loops).await.is_err() {
            warn!("OpenAI Realtime connection did not close within the configured timeout");
        }
    }
}

async fn outbound_loop(mut rx: mpsc::Receiver<OutboundMessage>, sink: Arc<Mutex<WsSink>>, call_id: String) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMessage::Json(value) => {
                let Ok(text) = serde_json::to_string(&value) else {
                    warn!(call_id = %call_id, "failed to serialize outbound message");
                    continue;
                };
                let event_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("unknown");
                debug!(call_id = %call_id, event_type, "sending to OpenAI Realtime");
                let mut sink = sink.lock().await;
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    warn!(call_id = %call_id, "send failed, stopping outbound loop");
                    break;
                }
            }
            OutboundMessage::Close => {
                let mut sink = sink.lock().await;
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    debug!(call_id = %call_id, "OpenAI Realtime outbound loop terminated");
}

async fn inbound_loop(
    mut source: WsSource,
    tx: mpsc::Sender<InboundEvent>,
    pong_tx: watch::Sender<Instant>,
    call_id: String,
) {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    if tx.send(InboundEvent::Json(value)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(call_id = %call_id, error = %e, "failed to parse OpenAI Realtime message"),
            },
            Ok(WsMessage::Close(frame)) => {
                info!(call_id = %call_id, close_frame = ?frame, "OpenAI Realtime connection closed");
                let _ = tx
                    .send(InboundEvent::Closed {
                        reason: "server closed connection".to_string(),
                    })
                    .await;
                return;
            }
            Ok(WsMessage::Pong(_)) => {
                let _ = pong_tx.send(Instant::now());
            }
            Ok(WsMessage::Ping(_) | WsMessage::Frame(_) | WsMessage::Binary(_)) => {}
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "OpenAI Realtime websocket error");
                let _ = tx
                    .send(InboundEvent::Closed {
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
    debug!(call_id = %call_id, "OpenAI Realtime inbound loop terminated");
}

/// Application-level keepalive ping. tungstenite answers the server's own
/// pings at the protocol level; this loop is the outbound fallback ping
/// spec.md §4.2 calls for when the socket library's native keepalive isn't
/// relied on alone. Each ping starts a `ping_timeout` deadline for a pong
/// to land on `pong_rx`; a missed deadline tears the connection down via
/// `inbound_tx` rather than spinning forever on a half-dead socket.
async fn keepalive_loop(
    sink: Arc<Mutex<WsSink>>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    mut pong_rx: watch::Receiver<Instant>,
    ping_interval: Duration,
    ping_timeout: Duration,
    call_id: String,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let ping_sent_at = Instant::now();
        {
            let mut sink = sink.lock().await;
            if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                warn!(call_id = %call_id, "keepalive ping failed");
                return;
            }
        }
        debug!(call_id = %call_id, "sent keepalive ping");

        let wait_for_pong = async {
            loop {
                if *pong_rx.borrow() >= ping_sent_at {
                    return;
                }
                if pong_rx.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(ping_timeout, wait_for_pong).await.is_err() {
            warn!(call_id = %call_id, "no pong within timeout, closing connection");
            let _ = inbound_tx
                .send(InboundEvent::Closed {
                    reason: "pong timeout".to_string(),
                })
                .await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_url_embeds_model() {
        let url = format!("{REALTIME_WS_URL}?model={}", "gpt-realtime");
        assert_eq!(url, "wss://api.openai.com/v1/realtime?model=gpt-realtime");
    }
}
