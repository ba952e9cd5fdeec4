use thiserror::Error;

/// Faults that end a voice session
///
/// None of these are retried by the engine. Every one of them routes through
/// the controller's teardown path before the session is reported as failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone access refused (user-actionable)
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Remote agent unreachable or rejected the connection
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    /// Connecting took longer than the configured budget
    #[error("Timed out connecting to the agent")]
    Timeout,

    /// Microphone or output device failed
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote agent reported an error mid-session
    #[error("{0}")]
    TransportError(String),
}

/// Why `SessionController::start` did not reach `Active`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("A session is already running")]
    AlreadyActive,

    #[error(transparent)]
    Failed(#[from] SessionError),

    #[error("Session was stopped before it became active")]
    Cancelled,
}
