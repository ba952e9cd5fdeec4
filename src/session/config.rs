use std::time::Duration;

use crate::agent::AgentConfig;
use crate::audio::{CaptureConfig, PlaybackConfig};

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote agent settings (model, prompt, endpoint)
    pub agent: AgentConfig,

    /// Microphone framing (16kHz, 4096-sample frames)
    pub capture: CaptureConfig,

    /// Agent audio scheduling (24kHz, backlog limit)
    pub playback: PlaybackConfig,

    /// Budget for connecting and receiving `Opened`
    /// Default: 10 seconds
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
