use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{RealtimeInputMessage, ServerMessage, SetupMessage};
use super::transport::{AgentConfig, AgentTransport, Connection, ConnectionIo, ServerEvent};
use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live agent transport over a WebSocket
///
/// Sends the setup message right after the handshake, then streams
/// microphone chunks as `{"media": ...}` messages and turns server JSON
/// (text or binary frames) into `ServerEvent`s.
#[derive(Debug, Default)]
pub struct LiveTransport;

impl LiveTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentTransport for LiveTransport {
    async fn connect(&self, config: &AgentConfig) -> Result<Connection, SessionError> {
        let url = config
            .connect_url()
            .map_err(|e| SessionError::ConnectionError(format!("Invalid agent endpoint: {}", e)))?;

        info!("Connecting to agent at {}...", url.host_str().unwrap_or("unknown host"));

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::ConnectionError(e.to_string()))?;

        let (mut write, read) = ws_stream.split();

        let setup = serde_json::to_string(&SetupMessage::from_config(config))
            .map_err(|e| SessionError::ConnectionError(e.to_string()))?;
        debug!("Sending setup: {}", setup);
        write
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| SessionError::ConnectionError(e.to_string()))?;

        info!("Connected to agent (model={})", config.model);

        let (connection, io) = Connection::pair(config.outbound_queue_depth);
        tokio::spawn(run_socket(write, read, io));

        Ok(connection)
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

/// Pump the socket until either side closes
async fn run_socket(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    io: ConnectionIo,
) {
    let ConnectionIo {
        mut outbound,
        events,
        mut close,
    } = io;

    if events.send(ServerEvent::Opened).await.is_err() {
        return;
    }

    let mut chunks_sent: u64 = 0;

    let terminal = loop {
        tokio::select! {
            _ = close.closed() => {
                debug!("Connection closed by caller");
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!("Failed to send close frame: {}", e);
                }
                break None;
            }

            chunk = outbound.recv() => {
                let Some(chunk) = chunk else {
                    break None;
                };
                let body = match serde_json::to_string(&RealtimeInputMessage::from(chunk)) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Failed to serialize audio chunk: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(body.into())).await {
                    error!("Failed to send audio chunk: {}", e);
                    break Some(ServerEvent::Error(format!("send failed: {}", e)));
                }
                chunks_sent += 1;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !forward_message(text.as_bytes(), &events).await {
                            break None;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !forward_message(&data, &events).await {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Agent closed connection: {:?}", frame);
                        break Some(ServerEvent::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Agent connection error: {}", e);
                        break Some(ServerEvent::Error(e.to_string()));
                    }
                    None => break Some(ServerEvent::Closed),
                }
            }
        }
    };

    if let Some(event) = terminal {
        let _ = events.send(event).await;
    }

    info!("Agent connection finished ({} chunk(s) sent)", chunks_sent);
}

/// Parse one server message and forward its events
///
/// Returns false once the caller is no longer listening.
async fn forward_message(raw: &[u8], events: &tokio::sync::mpsc::Sender<ServerEvent>) -> bool {
    let msg: ServerMessage = match serde_json::from_slice(raw) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Ignoring unparseable agent message: {}", e);
            return true;
        }
    };

    if msg.setup_complete.is_some() {
        debug!("Agent setup complete");
    }
    if msg
        .server_content
        .as_ref()
        .map(|c| c.turn_complete)
        .unwrap_or(false)
    {
        debug!("Agent turn complete");
    }

    for event in msg.into_events() {
        if events.send(event).await.is_err() {
            return false;
        }
    }
    true
}
