//! JSON message envelope and callback correlation.
//!
//! Inbound: `{ "type": ..., "callbackId"?: ..., ...fields }`
//!
//! Callback: `{ "type": CALLBACK_TYPE, "responseTo": ..., "callbackId": ..., "args": [...] }`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::error::SocketError;
use super::frame::Frame;

/// Message type of every callback envelope
pub const CALLBACK_TYPE: &str = "web-terminal/socket/callback";

/// A decoded inbound message.
///
/// Fields other than `type` and `callbackId` are kept verbatim so the
/// envelope re-serializes to the same object it was decoded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(
        rename = "callbackId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub callback_id: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Decode one inbound frame payload.
    pub fn decode(data: &[u8]) -> Result<Self, SocketError> {
        serde_json::from_slice(data).map_err(SocketError::MalformedMessage)
    }

    /// The envelope as a single JSON object, `type` and `callbackId` included.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        if let Some(kind) = &self.kind {
            object.insert("type".to_string(), Value::String(kind.clone()));
        }
        if let Some(id) = &self.callback_id {
            object.insert("callbackId".to_string(), id.clone());
        }
        Value::Object(object)
    }
}

/// Outbound acknowledgment of one inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
    pub callback_id: Value,
    pub args: Vec<Value>,
}

/// Reply slot handed to a listener together with the message it answers.
///
/// Consuming `respond` guarantees at most one callback per message; a
/// message without `callbackId` gets none at all.
pub struct Responder {
    tx: mpsc::UnboundedSender<Frame>,
    callback_id: Option<Value>,
    response_to: Option<String>,
}

impl Responder {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Frame>, envelope: &Envelope) -> Self {
        Self {
            tx,
            callback_id: envelope.callback_id.clone(),
            response_to: envelope.kind.clone(),
        }
    }

    /// Send the callback to the originating socket only.
    ///
    /// Returns `true` if a callback frame was queued.
    pub fn respond(self, args: Vec<Value>) -> bool {
        let Some(callback_id) = self.callback_id else {
            return false;
        };

        let message = CallbackMessage {
            kind: CALLBACK_TYPE.to_string(),
            response_to: self.response_to,
            callback_id,
            args,
        };
        match serde_json::to_string(&message) {
            Ok(json) => self.tx.send(Frame::Text(json)).is_ok(),
            Err(e) => {
                debug!("Failed to encode callback: {}", e);
                false
            }
        }
    }
}
