//! Translates OpenAI Realtime event names to internal names and fans each
//! event out to registered handlers, isolating one handler's panic/error
//! from the rest (spec §4.6).
//!
//! Grounded on `original_source/openai_voice/event_dispatcher.py`'s
//! `EventDispatcher`/`OpenAIEventRouter` pair: per-type handler lists plus
//! global handlers, a `try`/`except`-per-handler loop, and dual dispatch of
//! both the translated and the original event name.

use std::collections::HashMap;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::error;

pub type HandlerFn =
    Box<dyn Fn(&str, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// OpenAI wire event type → internal event type (spec §4.6's translation
/// table). Events absent from the map pass through unchanged.
static EVENT_MAPPING: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("response.audio.delta", "audio_delta"),
        ("response.output_audio.delta", "audio_output_delta"),
        ("response.output_audio_transcript.delta", "transcript_delta"),
        (
            "response.function_call_arguments.delta",
            "function_call_arguments.delta",
        ),
        (
            "response.function_call_arguments.done",
            "function_call_arguments.done",
        ),
        ("input_audio_buffer.speech_started", "speech_started"),
        ("input_audio_buffer.speech_stopped", "speech_stopped"),
        ("response.done", "response_done"),
        ("response.created", "response_created"),
        ("conversation.item.added", "conversation_item_added"),
        ("response.content_part.added", "content_part_added"),
        ("session.created", "session.created"),
        ("session.updated", "session.updated"),
        ("error", "error"),
    ])
});

/// Map an OpenAI event type to its internal name, or pass it through if
/// there's no translation.
pub fn translate_event_type(openai_event_type: &str) -> &str {
    EVENT_MAPPING
        .get(openai_event_type)
        .copied()
        .unwrap_or(openai_event_type)
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Vec<HandlerFn>>,
    global_handlers: Vec<HandlerFn>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, event_type: impl Into<String>, handler: HandlerFn) {
        self.handlers.entry(event_type.into()).or_default().push(handler);
    }

    pub fn register_global_handler(&mut self, handler: HandlerFn) {
        self.global_handlers.push(handler);
    }

    pub fn handler_count(&self, event_type: Option<&str>) -> usize {
        match event_type {
            Some(t) => self.handlers.get(t).map(Vec::len).unwrap_or(0),
            None => self.global_handlers.len() + self.handlers.values().map(Vec::len).sum::<usize>(),
        }
    }

    /// Dispatch `event_type` to every registered handler for it and every
    /// global handler. A handler's error is logged and never propagates —
    /// one misbehaving handler can't break the others (spec §4.6).
    pub async fn dispatch_event(&self, event_type: &str, data: &Value) {
        if let Some(hs) = self.handlers.get(event_type) {
            for handler in hs {
                if let Err(e) = handler(event_type, data.clone()).await {
                    error!(event_type, error = %e, "error in event handler");
                }
            }
        }
        for handler in &self.global_handlers {
            if let Err(e) = handler(event_type, data.clone()).await {
                error!(event_type, error = %e, "error in global event handler");
            }
        }
    }

    /// Route a raw OpenAI event: dispatch under its translated internal
    /// name, then again under its original wire name if they differ — so
    /// a handler registered on the original name (e.g. `"error"`, which
    /// doesn't change) still sees it, while dedicated internal-name
    /// handlers get the stable name.
    pub async fn route_openai_event(&self, openai_event_type: &str, data: &Value) {
        let internal = translate_event_type(openai_event_type);
        self.dispatch_event(internal, data).await;
        if internal != openai_event_type {
            self.dispatch_event(openai_event_type, data).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn translates_known_event_names() {
        assert_eq!(translate_event_type("response.audio.delta"), "audio_delta");
        assert_eq!(translate_event_type("response.done"), "response_done");
        assert_eq!(translate_event_type("session.created"), "session.created");
    }

    #[test]
    fn unknown_event_names_pass_through() {
        assert_eq!(translate_event_type("some.unmapped.event"), "some.unmapped.event");
    }

    #[tokio::test]
    async fn dispatch_reaches_both_specific_and_global_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let specific_count = Arc::new(AtomicUsize::new(0));
        let global_count = Arc::new(AtomicUsize::new(0));

        let sc = specific_count.clone();
        dispatcher.register_handler(
            "audio_delta",
            Box::new(move |_t, _d| {
                let sc = sc.clone();
                Box::pin(async move {
                    sc.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let gc = global_count.clone();
        dispatcher.register_global_handler(Box::new(move |_t, _d| {
            let gc = gc.clone();
            Box::pin(async move {
                gc.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

        dispatcher.dispatch_event("audio_delta", &Value::Null).await;
        dispatcher.dispatch_event("unrelated_event", &Value::Null).await;

        assert_eq!(specific_count.load(Ordering::SeqCst), 1);
        assert_eq!(global_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_handler_erroring_does_not_stop_the_others() {
        let mut dispatcher = EventDispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));

        dispatcher.register_handler(
            "x",
            Box::new(|_t, _d| Box::pin(async move { Err(anyhow::anyhow!("boom")) })),
        );
        let r = ran.clone();
        dispatcher.register_handler(
            "x",
            Box::new(move |_t, _d| {
                let r = r.clone();
                Box::pin(async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        dispatcher.dispatch_event("x", &Value::Null).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn route_openai_event_dispatches_translated_and_original_names() {
        let mut dispatcher = EventDispatcher::new();
        let translated_hits = Arc::new(AtomicUsize::new(0));
        let original_hits = Arc::new(AtomicUsize::new(0));

        let t = translated_hits.clone();
        dispatcher.register_handler(
            "audio_delta",
            Box::new(move |_t, _d| {
                let t = t.clone();
                Box::pin(async move {
                    t.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        let o = original_hits.clone();
        dispatcher.register_handler(
            "response.audio.delta",
            Box::new(move |_t, _d| {
                let o = o.clone();
                Box::pin(async move {
                    o.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        dispatcher.route_openai_event("response.audio.delta", &Value::Null).await;

        assert_eq!(translated_hits.load(Ordering::SeqCst), 1);
        assert_eq!(original_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn route_openai_event_does_not_double_dispatch_unmapped_names() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        dispatcher.register_handler(
            "session.created",
            Box::new(move |_t, _d| {
                let h = h.clone();
                Box::pin(async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        dispatcher.route_openai_event("session.created", &Value::Null).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
