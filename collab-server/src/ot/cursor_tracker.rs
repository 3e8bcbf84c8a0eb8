//! Per-editor remote-user registry and cursor transform.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::ot::model::{validate_insert_bounds, Cursor, Operation, RemoteUser, Selection};
use crate::ot::transform::OtTransformer;

/// Tracks remote users' presence (cursor/selection/activity) for one editor.
#[derive(Default)]
pub struct CursorTracker {
    users: HashMap<String, RemoteUser>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user, overwriting any existing entry with the same id.
    pub fn add_user(&mut self, user: RemoteUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn remove_user(&mut self, user_id: &str) -> Option<RemoteUser> {
        self.users.remove(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<&RemoteUser> {
        self.users.get(user_id)
    }

    /// Updates a user's cursor/selection, bounds-checking the cursor column
    /// against `content_len` before committing the change.
    pub fn update_cursor(
        &mut self,
        user_id: &str,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
        now: u64,
        content_len: usize,
    ) -> CoreResult<()> {
        if let Some(c) = cursor {
            validate_insert_bounds(c.column, content_len)?;
        }
        let user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| CoreError::InvalidCursorPosition {
                position: cursor.map(|c| c.column).unwrap_or(0),
                content_len,
            })?;
        user.cursor = cursor;
        user.selection = selection;
        user.last_seen = now;
        Ok(())
    }

    pub fn set_active(&mut self, user_id: &str, is_active: bool) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.is_active = is_active;
        }
    }

    pub fn get_active_remote_users(&self) -> Vec<&RemoteUser> {
        self.users.values().filter(|u| u.is_active).collect()
    }

    pub fn all(&self) -> Vec<&RemoteUser> {
        self.users.values().collect()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    /// Applies `op`'s position arithmetic to every tracked cursor/selection.
    pub fn transform_for_operation(&mut self, op: &Operation) {
        for user in self.users.values_mut() {
            if let Some(cursor) = user.cursor {
                user.cursor = Some(OtTransformer::transform_cursor(cursor, op));
            }
            if let Some(selection) = user.selection {
                user.selection = Some(Selection {
                    start: OtTransformer::transform_cursor(selection.start, op),
                    end: OtTransformer::transform_cursor(selection.end, op),
                });
            }
        }
    }
}
