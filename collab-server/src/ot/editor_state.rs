//! Content buffer, mode gate, and undo/redo stacks for a single editor.

use crate::error::{CoreError, CoreResult};
use crate::ot::model::{validate_delete_bounds, validate_insert_bounds, EditorMode, Operation, OperationKind};

/// Holds the live text buffer for one editor and applies operations to it.
pub struct EditorState {
    content: String,
    version: u64,
    mode: EditorMode,
    undo_stack: Vec<UndoEntry>,
    redo_stack: Vec<UndoEntry>,
}

/// A previously-applied operation together with the text it removed (if
/// any), so that undo can reconstruct the exact inverse without needing to
/// re-derive it from the post-apply buffer.
#[derive(Clone)]
struct UndoEntry {
    op: Operation,
    removed: String,
}

impl Default for EditorState {
    fn default() -> Self {
        Self {
            content: String::new(),
            version: 0,
            mode: EditorMode::Active,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }
}

impl EditorState {
    pub fn new(content: String) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EditorMode) {
        self.mode = mode;
    }

    /// Wipes content, undo/redo, and version; keeps the mode.
    pub fn set_content(&mut self, content: String) {
        self.content = content;
        self.version = 0;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn reset(&mut self) {
        self.content.clear();
        self.version = 0;
        self.mode = EditorMode::Active;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Apply `op` to the buffer, gated by mode and bounds-checked per the
    /// data model's invariant 3.
    pub fn apply(&mut self, op: &Operation) -> CoreResult<()> {
        match self.mode {
            EditorMode::Disconnected | EditorMode::ReadOnly => {
                return Err(CoreError::OperationApply {
                    reason: format!("editor is in {:?} mode", self.mode),
                });
            }
            EditorMode::Active => {}
        }

        let char_len = self.content.chars().count();
        let removed = match op.kind {
            OperationKind::Insert => {
                validate_insert_bounds(op.position, char_len)?;
                let idx = byte_offset(&self.content, op.position);
                self.content.insert_str(idx, &op.content);
                String::new()
            }
            OperationKind::Delete => {
                validate_delete_bounds(op.position, op.length, char_len)?;
                let start = byte_offset(&self.content, op.position);
                let end = byte_offset(&self.content, op.position + op.length);
                let removed = self.content[start..end].to_string();
                self.content.replace_range(start..end, "");
                removed
            }
        };
        self.version = self.version.max(op.version + 1);
        self.undo_stack.push(UndoEntry { op: op.clone(), removed });
        self.redo_stack.clear();
        Ok(())
    }

    /// Reverts the most recently applied operation directly on the buffer,
    /// moving it onto the redo stack. Returns `true` if there was anything
    /// to undo.
    pub fn undo(&mut self) -> bool {
        let Some(entry) = self.undo_stack.pop() else {
            return false;
        };
        match entry.op.kind {
            OperationKind::Insert => {
                let start = byte_offset(&self.content, entry.op.position);
                let end = byte_offset(&self.content, entry.op.position + entry.op.content.chars().count());
                self.content.replace_range(start..end, "");
            }
            OperationKind::Delete => {
                let idx = byte_offset(&self.content, entry.op.position);
                self.content.insert_str(idx, &entry.removed);
            }
        }
        self.redo_stack.push(entry);
        true
    }

    /// Re-applies the most recently undone operation. Returns `true` if
    /// there was anything to redo.
    pub fn redo(&mut self) -> bool {
        let Some(entry) = self.redo_stack.pop() else {
            return false;
        };
        match entry.op.kind {
            OperationKind::Insert => {
                let idx = byte_offset(&self.content, entry.op.position);
                self.content.insert_str(idx, &entry.op.content);
            }
            OperationKind::Delete => {
                let start = byte_offset(&self.content, entry.op.position);
                let end = byte_offset(&self.content, entry.op.position + entry.op.length);
                self.content.replace_range(start..end, "");
            }
        }
        self.undo_stack.push(entry);
        true
    }
}

fn byte_offset(s: &str, char_offset: usize) -> usize {
    s.char_indices().nth(char_offset).map(|(i, _)| i).unwrap_or(s.len())
}
