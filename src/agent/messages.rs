use serde::{Deserialize, Serialize};

use super::transport::{AgentConfig, ResponseModality, ServerEvent};
use crate::audio::{backend::OUTPUT_SAMPLE_RATE, codec, EncodedChunk};

/// First message on a new connection
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupMessage {
    pub setup: SessionSetup,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub model: String,
    pub system_instruction: String,
    pub response_modality: ResponseModality,
}

impl SetupMessage {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            setup: SessionSetup {
                model: config.model.clone(),
                system_instruction: config.system_instruction.clone(),
                response_modality: config.response_modality,
            },
        }
    }
}

/// Outbound microphone audio
#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeInputMessage {
    pub media: MediaChunk,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,  // Base64-encoded PCM bytes
    pub mime_type: String,
}

impl From<EncodedChunk> for RealtimeInputMessage {
    fn from(chunk: EncodedChunk) -> Self {
        Self {
            media: MediaChunk {
                data: chunk.data,
                mime_type: chunk.mime_type,
            },
        }
    }
}

/// Anything the agent sends; unknown fields are ignored
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub server_content: Option<ServerContent>,
    pub setup_complete: Option<serde_json::Value>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

impl ServerMessage {
    /// Translate into engine events, in the order they must be handled
    ///
    /// An interruption comes before any audio in the same message, since
    /// that audio is the content superseding what was cut off.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if let Some(error) = self.error {
            events.push(ServerEvent::Error(error.message));
            return events;
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }

            let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
            for part in parts {
                if let Some(inline) = part.inline_data {
                    events.push(ServerEvent::AudioChunk {
                        payload: inline.data,
                        mime: inline
                            .mime_type
                            .unwrap_or_else(|| codec::pcm_mime_type(OUTPUT_SAMPLE_RATE)),
                    });
                }
            }
        }

        events
    }
}
