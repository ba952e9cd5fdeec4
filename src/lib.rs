pub mod agent;
pub mod audio;
pub mod config;
pub mod error;
pub mod session;

pub use agent::{AgentConfig, AgentTransport, Connection, LiveTransport, ServerEvent};
pub use audio::{
    AudioFrame, CaptureConfig, CaptureEngine, EncodedChunk, MicHandle, Microphone, OutputDevice,
    OutputHandle, PlaybackConfig, PlaybackScheduler, WavMicrophone, WavOutput,
};
pub use config::Config;
pub use error::{SessionError, StartError};
pub use session::{SessionConfig, SessionController, SessionState, SessionStats};
