//! The realtime voice relay: translates between a telephony audio leg and
//! the OpenAI Realtime API, independent of which server transport carries
//! the telephony leg (spec §3-§5).

pub mod audio_handler;
pub mod audio_processor;
pub mod connection;
pub mod event_router;
pub mod function_call;
pub mod registry;
pub mod session;
pub mod session_init;
pub mod state;
pub mod tools;

pub use audio_handler::{AudioHandler, AudioTransmitter, InboundAudioPort, MarkCounter};
pub use registry::{CallId, SessionHandle, SessionRegistry};
pub use session::{NullObserver, Session, SessionObserver};
pub use state::VoiceAssistantState;
pub use tools::{BridgeToolRegistry, ToolDefinition, ToolRegistry};
