//! TwiML generation for the inbound-call webhook (spec §4 Telephony Leg).
//!
//! Grounded on `original_source/server.py`'s `handle_incoming_call`: a
//! greeting `<Say>`, a `<Pause>`, a second `<Say>`, then a `<Connect>`
//! that opens the media stream back to this same host.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::Host;

use crate::server::ServerState;

/// `GET|POST /incoming-call` — build the TwiML that bridges the caller
/// into the `/media-stream` WebSocket.
pub async fn incoming_call(Host(host): Host, State(state): State<ServerState>) -> Response {
    let greeting = &state.config.twilio.greeting_message;
    let pause = state.config.twilio.pause_length_secs;
    let voice = &state.config.twilio.twiml_voice;
    let stream_url = format!("wss://{host}/media-stream");

    let twiml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Say voice="{voice}">{greeting}</Say>
    <Pause length="{pause}"/>
    <Connect>
        <Stream url="{stream_url}"/>
    </Connect>
</Response>"#
    );

    ([("content-type", "text/xml")], twiml).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::relay::{BridgeToolRegistry, SessionRegistry};
    use std::sync::Arc;

    #[tokio::test]
    async fn incoming_call_embeds_the_media_stream_host() {
        let state = ServerState {
            config: Arc::new(BridgeConfig::default()),
            registry: SessionRegistry::new(),
            tools: Arc::new(BridgeToolRegistry::default()),
        };
        let response = incoming_call(Host("example.com".to_string()), State(state)).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
