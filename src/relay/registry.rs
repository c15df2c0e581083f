//! Process-wide table of active calls (spec §5, §9 "Global mutable state").
//!
//! A single `tokio::sync::Mutex<HashMap<..>>` confined to insert-on-accept,
//! remove-on-teardown, and iterate-on-shutdown, per spec.md's explicit
//! guidance that a single mutex is sufficient here — this crate has no
//! `dashmap` dependency to reach for instead, and the access pattern never
//! holds the lock across an await that could block on the network.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::state::VoiceAssistantState;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub String);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct SessionHandle {
    pub cancel: CancellationToken,
    pub state_rx: watch::Receiver<VoiceAssistantState>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<CallId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, call_id: CallId, handle: SessionHandle) {
        self.sessions.lock().await.insert(call_id, handle);
    }

    pub async fn remove(&self, call_id: &CallId) {
        self.sessions.lock().await.remove(call_id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn state_of(&self, call_id: &CallId) -> Option<VoiceAssistantState> {
        self.sessions.lock().await.get(call_id).map(|h| *h.state_rx.borrow())
    }

    /// Cancel every active session, used on process shutdown.
    pub async fn cancel_all(&self) {
        let sessions = self.sessions.lock().await;
        info!(count = sessions.len(), "cancelling all active sessions");
        for handle in sessions.values() {
            handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SessionHandle {
        let (_tx, rx) = watch::channel(VoiceAssistantState::Connecting);
        SessionHandle {
            cancel: CancellationToken::new(),
            state_rx: rx,
        }
    }

    #[tokio::test]
    async fn insert_and_remove_round_trip() {
        let registry = SessionRegistry::new();
        let id = CallId("call_1".to_string());
        registry.insert(id.clone(), handle()).await;
        assert_eq!(registry.len().await, 1);
        registry.remove(&id).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_all_cancels_every_token() {
        let registry = SessionRegistry::new();
        let h1 = handle();
        let h2 = handle();
        let t1 = h1.cancel.clone();
        let t2 = h2.cancel.clone();
        registry.insert(CallId("a".to_string()), h1).await;
        registry.insert(CallId("b".to_string()), h2).await;

        registry.cancel_all().await;

        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn state_of_reflects_latest_watch_value() {
        let registry = SessionRegistry::new();
        let (tx, rx) = watch::channel(VoiceAssistantState::Connecting);
        let id = CallId("c".to_string());
        registry
            .insert(
                id.clone(),
                SessionHandle {
                    cancel: CancellationToken::new(),
                    state_rx: rx,
                },
            )
            .await;
        tx.send(VoiceAssistantState::Connected).unwrap();
        assert_eq!(registry.state_of(&id).await, Some(VoiceAssistantState::Connected));
    }
}
