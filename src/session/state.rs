use std::fmt;

use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::error::SessionError;

/// Lifecycle of a voice session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Ended,
    Failed(SessionError),
}

impl SessionState {
    /// Connecting or active: a session owns devices right now
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    /// Human-readable status line for the caller
    pub fn status_message(&self) -> String {
        match self {
            SessionState::Idle => "Ready".to_string(),
            SessionState::Connecting => "Connecting...".to_string(),
            SessionState::Active => "Live".to_string(),
            SessionState::Ended => "Session ended".to_string(),
            SessionState::Failed(reason) => reason.to_string(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_message())
    }
}

/// Capacity of the transition broadcast channel
const TRANSITION_CAPACITY: usize = 32;

/// The single place session state is written
///
/// `watch` keeps the current value for `status()`; `broadcast` delivers
/// every transition to subscribers so none are skipped.
pub(crate) struct StateCell {
    current: watch::Sender<SessionState>,
    transitions: broadcast::Sender<SessionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (current, _) = watch::channel(SessionState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            current,
            transitions,
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        self.current.borrow().clone()
    }

    pub(crate) fn set(&self, state: SessionState) {
        let previous = self.current.send_replace(state.clone());
        info!("Session state: {:?} -> {:?}", previous, state);
        // No subscribers is fine
        let _ = self.transitions.send(state);
    }

    pub(crate) fn watch(&self) -> watch::Receiver<SessionState> {
        self.current.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.transitions.subscribe()
    }
}
