use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::audio::EncodedChunk;
use crate::error::SessionError;

/// Depth of the inbound event queue
const EVENT_QUEUE_DEPTH: usize = 64;

/// What the agent should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    Audio,
}

/// Connection settings for the remote audio agent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// WebSocket endpoint of the live agent service
    pub endpoint: String,
    /// API key, appended to the endpoint as `?key=...`
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Static behavior prompt
    pub system_instruction: String,
    pub response_modality: ResponseModality,
    /// Outbound chunks that may queue before new ones are dropped
    pub outbound_queue_depth: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_key: None,
            model: "models/gemini-2.0-flash-exp".to_string(),
            system_instruction: "You are a friendly interviewer running a mock job interview. \
                Ask one question at a time and keep answers short."
                .to_string(),
            response_modality: ResponseModality::Audio,
            outbound_queue_depth: 64,
        }
    }
}

impl AgentConfig {
    /// Endpoint URL with the API key applied
    pub fn connect_url(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }
}

/// An event from the agent, delivered strictly in receive order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The session is ready; always first
    Opened,
    /// Synthesized speech (base64 PCM16)
    AudioChunk { payload: String, mime: String },
    /// Discard unplayed audio, newer content follows
    Interrupted,
    /// The agent closed the session
    Closed,
    /// Transport or agent failure
    Error(String),
}

/// Cloneable, non-blocking handle for outbound audio
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<EncodedChunk>,
}

impl ChunkSender {
    /// Queue a chunk for sending; never waits
    ///
    /// Returns false if the chunk was dropped (queue full or connection
    /// closed). Queued chunks go out in order.
    pub fn send(&self, chunk: EncodedChunk) -> bool {
        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound audio queue full, dropping chunk");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Connection closed, dropping chunk");
                false
            }
        }
    }
}

/// Caller side of an open agent session
pub struct Connection {
    sender: ChunkSender,
    events: mpsc::Receiver<ServerEvent>,
    shutdown: watch::Sender<bool>,
}

/// Transport side of a `Connection`: the I/O task drains `outbound`,
/// publishes `events` and watches `close` for the caller hanging up
pub struct ConnectionIo {
    pub outbound: mpsc::Receiver<EncodedChunk>,
    pub events: mpsc::Sender<ServerEvent>,
    pub close: CloseSignal,
}

/// Resolves once the caller closes (or drops) the connection
#[derive(Clone)]
pub struct CloseSignal {
    rx: watch::Receiver<bool>,
}

impl CloseSignal {
    pub async fn closed(&mut self) {
        // A dropped Connection counts as closed
        let _ = self.rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Connection {
    /// Create both ends of a connection
    pub fn pair(outbound_queue_depth: usize) -> (Connection, ConnectionIo) {
        let (out_tx, out_rx) = mpsc::channel(outbound_queue_depth.max(1));
        let (ev_tx, ev_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Connection {
            sender: ChunkSender { tx: out_tx },
            events: ev_rx,
            shutdown: shutdown_tx,
        };
        let io = ConnectionIo {
            outbound: out_rx,
            events: ev_tx,
            close: CloseSignal { rx: shutdown_rx },
        };
        (connection, io)
    }

    /// Handle for sending audio; safe to use while events are consumed
    pub fn sender(&self) -> ChunkSender {
        self.sender.clone()
    }

    /// Send one chunk (fire-and-forget)
    pub fn send(&self, chunk: EncodedChunk) -> bool {
        self.sender.send(chunk)
    }

    /// Next event from the agent; `None` once the transport is gone
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&self) {
        let was_open = !self.shutdown.send_replace(true);
        if was_open {
            info!("Closing agent connection");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// A way to reach the remote conversational audio agent
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Open a streaming session
    ///
    /// Fails with `ConnectionError`; callers do not retry.
    async fn connect(&self, config: &AgentConfig) -> Result<Connection, SessionError>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}
