//! Control-channel wire message for the subway tunnel protocol.

use serde::{Deserialize, Serialize};

/// Maximum frame payload size accepted by [`crate::frame`] (1 MiB).
pub const MAX_FRAME: usize = 1024 * 1024;

/// One control- or data-channel message.
///
/// The same struct serializes both directions; unknown fields on read are
/// ignored by `serde_json`'s default behavior, and absent optional fields
/// are omitted on write via `skip_serializing_if`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
}

/// The four message kinds exchanged over the wire (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Hello,
    Open,
    Accept,
    Close,
}

impl Message {
    /// `hello{subdomain?}`, sent client → server to request a tunnel.
    pub fn hello(subdomain: Option<String>) -> Self {
        Self {
            message_type: MessageType::Hello,
            id: None,
            endpoint: None,
            subdomain,
        }
    }

    /// `hello{endpoint}`, sent server → client once the tunnel is live.
    pub fn hello_reply(endpoint: String) -> Self {
        Self {
            message_type: MessageType::Hello,
            id: None,
            endpoint: Some(endpoint),
            subdomain: None,
        }
    }

    /// `open{id}`, sent server → client when a public request arrived.
    pub fn open(id: String) -> Self {
        Self {
            message_type: MessageType::Open,
            id: Some(id),
            endpoint: None,
            subdomain: None,
        }
    }

    /// `accept{id}`, sent client → server as the first frame on a data channel.
    pub fn accept(id: String) -> Self {
        Self {
            message_type: MessageType::Accept,
            id: Some(id),
            endpoint: None,
            subdomain: None,
        }
    }

    /// `close`, sent server → client when the session is being torn down.
    pub fn close() -> Self {
        Self {
            message_type: MessageType::Close,
            id: None,
            endpoint: None,
            subdomain: None,
        }
    }
}
