//! Session lifecycle state machine (spec §4.1 / §3 Session).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceAssistantState {
    Disconnected,
    Connecting,
    Connected,
    Listening,
    Speaking,
    Error,
}

impl VoiceAssistantState {
    /// Whether audio may be streamed to the model from this state.
    pub fn accepts_input(self) -> bool {
        matches!(self, VoiceAssistantState::Connected | VoiceAssistantState::Listening)
    }
}

impl std::fmt::Display for VoiceAssistantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VoiceAssistantState::Disconnected => "disconnected",
            VoiceAssistantState::Connecting => "connecting",
            VoiceAssistantState::Connected => "connected",
            VoiceAssistantState::Listening => "listening",
            VoiceAssistantState::Speaking => "speaking",
            VoiceAssistantState::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_and_listening_accept_input() {
        assert!(VoiceAssistantState::Connected.accepts_input());
        assert!(VoiceAssistantState::Listening.accepts_input());
        assert!(!VoiceAssistantState::Disconnected.accepts_input());
        assert!(!VoiceAssistantState::Speaking.accepts_input());
        assert!(!VoiceAssistantState::Error.accepts_input());
    }
}
