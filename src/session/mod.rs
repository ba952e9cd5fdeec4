//! Voice session management
//!
//! This module provides the `SessionController` that owns one live
//! conversation with the remote agent:
//! - Microphone acquisition and capture gating
//! - Agent connection lifecycle and event routing
//! - Playback scheduling and barge-in handling
//! - Session state notifications and statistics

mod config;
mod controller;
mod state;
mod stats;

pub use config::SessionConfig;
pub use controller::SessionController;
pub use state::SessionState;
pub use stats::SessionStats;
