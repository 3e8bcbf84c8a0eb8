//! Wire schema for the transport (§6): inbound frames from clients, outbound
//! frames to clients, and the internal writer-task command that wraps an
//! outbound frame with transport-level actions (close).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ot::model::{Cursor, Operation, Selection};

/// Generic inbound envelope. Payload is kept as a raw [`Value`] so that
/// "missing `type`" / "empty `sessionId`" can be rejected before attempting
/// to parse a type-specific payload shape (§7: `InvalidMessageError`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawInboundFrame {
    #[serde(rename = "type")]
    pub frame_type: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub payload: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// `operation.payload`.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationPayload {
    #[serde(rename = "documentId")]
    pub document_id: String,
    pub operation: Operation,
    pub version: u64,
}

/// `subscribe.payload` / `unsubscribe.payload`.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPayload {
    #[serde(rename = "documentId")]
    pub document_id: String,
}

/// `cursor.payload`: a presence update for the sender's own cursor/selection.
#[derive(Debug, Clone, Deserialize)]
pub struct CursorPayload {
    #[serde(rename = "documentId")]
    pub document_id: String,
    #[serde(default)]
    pub cursor: Option<Cursor>,
    #[serde(default)]
    pub selection: Option<Selection>,
}

/// Outbound frame sent to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Connection {
        #[serde(rename = "sessionId")]
        session_id: String,
        timestamp: u64,
    },
    Operation {
        #[serde(rename = "documentId")]
        document_id: String,
        data: Value,
        #[serde(rename = "excludeSessionId", skip_serializing_if = "Option::is_none")]
        exclude_session_id: Option<String>,
        timestamp: u64,
    },
    Notification {
        #[serde(rename = "documentId")]
        document_id: String,
        data: Value,
        #[serde(rename = "excludeSessionId", skip_serializing_if = "Option::is_none")]
        exclude_session_id: Option<String>,
        timestamp: u64,
    },
    Heartbeat {
        timestamp: u64,
    },
}

/// Command sent over a connection's outbound channel: either a frame to
/// serialize and write, or an instruction to close the transport.
#[derive(Debug, Clone)]
pub enum WsCommand {
    Send(OutboundFrame),
    Close { code: u16, reason: String },
}
