//! Typed error taxonomy for the OT engine and session fabric.
//!
//! Disposition of each variant is documented at the call site; see §7 of the
//! design spec for the authoritative table (logged-and-dropped vs.
//! surfaced-to-caller).

use thiserror::Error;

/// Errors produced by the core collaboration engine and session fabric.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("operation denied for document {document_id}: not subscribed")]
    OperationDenied { document_id: String },

    #[error("rate limit exceeded for user {user_id}")]
    RateLimit { user_id: String },

    #[error("version conflict: got {got}, current is {current}")]
    VersionConflict { got: u64, current: u64 },

    #[error("operation apply error: {reason}")]
    OperationApply { reason: String },

    #[error("operation transform error: {reason}")]
    OperationTransform { reason: String },

    #[error("invalid cursor/operation position {position} (content length {content_len})")]
    InvalidCursorPosition { position: usize, content_len: usize },

    #[error("editor {0} is not initialized")]
    CollaborationDisabled(String),

    #[error("operation batch must contain between 1 and 100 operations, got {len}")]
    OperationBatchValidation { len: usize },

    #[error("websocket authentication failed: {0}")]
    WebSocketAuthentication(String),
}

/// Convenience alias for fallible core operations.
pub type CoreResult<T> = Result<T, CoreError>;
