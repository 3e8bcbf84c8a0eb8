//! Value shapes for the OT engine: operations, cursors, remote users, snapshots.
//!
//! Positions are flat character offsets into the document's `content` buffer,
//! consistent across client and server (see module docs on `transform` for the
//! source's documented flat-offset limitation).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// The kind of edit an [`Operation`] performs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Delete,
}

/// The atomic edit unit exchanged between client and server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Character offset in `content` where this operation applies.
    pub position: usize,
    /// Inserted text; empty for `Delete`.
    #[serde(default)]
    pub content: String,
    /// Delete span length; 0 for `Insert`.
    #[serde(default)]
    pub length: usize,
    pub client_id: String,
    /// Wall-clock instant; informational only, never used for ordering.
    #[serde(default)]
    pub timestamp: u64,
    /// The history version the author observed when producing this op.
    pub version: u64,
}

impl Operation {
    pub fn insert(id: String, position: usize, content: String, client_id: String, version: u64) -> Self {
        Self {
            id,
            kind: OperationKind::Insert,
            position,
            content,
            length: 0,
            client_id,
            timestamp: 0,
            version,
        }
    }

    pub fn delete(id: String, position: usize, length: usize, client_id: String, version: u64) -> Self {
        Self {
            id,
            kind: OperationKind::Delete,
            position,
            content: String::new(),
            length,
            client_id,
            timestamp: 0,
            version,
        }
    }

    /// End offset affected by this operation: `position` for insert,
    /// `position + length` for delete.
    pub fn end(&self) -> usize {
        match self.kind {
            OperationKind::Insert => self.position,
            OperationKind::Delete => self.position + self.length,
        }
    }
}

/// An ordered batch of operations sharing one `baseVersion`, bounded to `[1, 100]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationBatch {
    pub id: String,
    pub client_id: String,
    pub base_version: u64,
    pub operations: Vec<Operation>,
}

/// Minimum number of operations allowed in a batch.
pub const BATCH_MIN_LEN: usize = 1;
/// Maximum number of operations allowed in a batch.
pub const BATCH_MAX_LEN: usize = 100;

impl OperationBatch {
    pub fn validate(&self) -> CoreResult<()> {
        if self.operations.len() < BATCH_MIN_LEN || self.operations.len() > BATCH_MAX_LEN {
            return Err(CoreError::OperationBatchValidation {
                len: self.operations.len(),
            });
        }
        Ok(())
    }
}

/// Opaque structured point, transformed via the same position arithmetic as
/// `Operation`. `line` is preserved as-is; only `column` is adjusted, as if
/// the whole document were line 0 (see the open question in the spec's design
/// notes — this is a documented limitation, not a bug).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    pub line: usize,
    pub column: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selection {
    pub start: Cursor,
    pub end: Cursor,
}

/// A remote collaborator's presence within one editor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: String,
    pub name: String,
    /// `#RRGGBB`.
    pub color: String,
    pub cursor: Option<Cursor>,
    pub selection: Option<Selection>,
    pub is_active: bool,
    pub last_seen: u64,
}

/// A point-in-time content + version capture.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSnapshot {
    pub id: String,
    pub content: String,
    pub version: u64,
    pub timestamp: u64,
    pub client_id: String,
}

/// Editing mode for one editor's [`super::editor_state::EditorState`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditorMode {
    Active,
    ReadOnly,
    Disconnected,
}

pub(crate) fn validate_insert_bounds(position: usize, content_len: usize) -> CoreResult<()> {
    if position > content_len {
        return Err(CoreError::InvalidCursorPosition {
            position,
            content_len,
        });
    }
    Ok(())
}

pub(crate) fn validate_delete_bounds(
    position: usize,
    length: usize,
    content_len: usize,
) -> CoreResult<()> {
    let end = position.checked_add(length).ok_or(CoreError::InvalidCursorPosition {
        position,
        content_len,
    })?;
    if position > content_len || end > content_len {
        return Err(CoreError::InvalidCursorPosition {
            position,
            content_len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_bounds() {
        let mut batch = OperationBatch {
            id: "b1".into(),
            client_id: "c1".into(),
            base_version: 0,
            operations: Vec::new(),
        };
        assert!(batch.validate().is_err());
        batch.operations.push(Operation::insert("o1".into(), 0, "a".into(), "c1".into(), 0));
        assert!(batch.validate().is_ok());
        for i in 0..BATCH_MAX_LEN {
            batch
                .operations
                .push(Operation::insert(format!("o{i}"), 0, "a".into(), "c1".into(), 0));
        }
        assert!(batch.validate().is_err());
    }

    #[test]
    fn insert_bounds() {
        assert!(validate_insert_bounds(5, 5).is_ok());
        assert!(validate_insert_bounds(6, 5).is_err());
    }

    #[test]
    fn delete_bounds() {
        assert!(validate_delete_bounds(2, 3, 5).is_ok());
        assert!(validate_delete_bounds(2, 4, 5).is_err());
    }
}
