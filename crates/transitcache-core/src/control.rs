//! Control channel messages from the foreground page.
//!
//! Messages arrive as JSON objects with a `type` field:
//!
//! - `SKIP_WAITING`: promote a pending instance immediately
//! - `GET_VERSION`: reply with the cache version and an offline flag
//! - `CLEAR_CACHE`: delete every store and reply with an acknowledgment
//!
//! Unknown types are logged and ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    SkipWaiting,
    GetVersion,
    ClearCache,
    Unknown(String),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
}

impl ControlMessage {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "SKIP_WAITING" => ControlMessage::SkipWaiting,
            "GET_VERSION" => ControlMessage::GetVersion,
            "CLEAR_CACHE" => ControlMessage::ClearCache,
            other => ControlMessage::Unknown(other.to_string()),
        }
    }

    /// Parse `{"type": "...", "data": ...}`. Extra fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_str(json)?;
        Ok(Self::from_type(&raw.kind))
    }

    pub fn type_name(&self) -> &str {
        match self {
            ControlMessage::SkipWaiting => "SKIP_WAITING",
            ControlMessage::GetVersion => "GET_VERSION",
            ControlMessage::ClearCache => "CLEAR_CACHE",
            ControlMessage::Unknown(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Version { version: String, offline: bool },
    Cleared { success: bool },
}

/// One-shot reply port handed in with a message.
pub type ReplySender = oneshot::Sender<ControlReply>;

pub(crate) fn send_reply(reply_to: Option<ReplySender>, reply: ControlReply) {
    let Some(reply_to) = reply_to else {
        warn!(?reply, "No reply channel for control message");
        return;
    };
    if reply_to.send(reply).is_err() {
        warn!("Control reply receiver dropped");
    }
}
