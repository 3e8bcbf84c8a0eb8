//! Operational-transform engine: data model, pure transform, history,
//! per-editor buffer state, cursor tracking, and the orchestrating
//! [`engine::CollaborationEngine`].

pub mod cursor_tracker;
pub mod editor_state;
pub mod engine;
pub mod history;
pub mod model;
pub mod transform;

pub use cursor_tracker::CursorTracker;
pub use editor_state::EditorState;
pub use engine::{CollaborationEngine, CursorBroadcast, CursorBroadcastCallback};
pub use history::{HistorySnapshot, OperationHistory};
pub use model::{
    Cursor, EditorMode, EditorSnapshot, Operation, OperationBatch, OperationKind, RemoteUser, Selection,
};
pub use transform::OtTransformer;
