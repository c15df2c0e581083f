//! Voice bridge — relays call audio between a telephony leg (Twilio Media
//! Streams) and the OpenAI Realtime API, with barge-in interruption,
//! function calling, and configurable output streaming policy.

pub mod cli;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;

pub use config::Config;
pub use relay::{Session, SessionObserver, VoiceAssistantState};
pub use server::{start as start_server, ServerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
