pub mod messages;
pub mod transport;
pub mod websocket;

pub use messages::{RealtimeInputMessage, ServerMessage, SetupMessage};
pub use transport::{
    AgentConfig, AgentTransport, ChunkSender, CloseSignal, Connection, ConnectionIo,
    ResponseModality, ServerEvent,
};
pub use websocket::LiveTransport;
