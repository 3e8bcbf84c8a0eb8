//! Orchestrates [`EditorState`], [`OperationHistory`], [`CursorTracker`], and
//! cursor-broadcast timers for every `editorId`, emitting domain events as it
//! goes.
//!
//! Each editor's mutable state lives behind one `tokio::sync::Mutex`
//! (actor-per-editor, see the design spec's §5/§9): every externally
//! observable mutation happens with that lock held, which is what gives the
//! total order on `version` the concurrency model requires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::event_bus::{DomainEvent, EventBus};
use crate::id_gen::IdGenerator;
use crate::ot::cursor_tracker::CursorTracker;
use crate::ot::editor_state::EditorState;
use crate::ot::history::OperationHistory;
use crate::ot::model::{Cursor, EditorSnapshot, Operation, OperationBatch, RemoteUser, Selection};
use crate::ot::transform::OtTransformer;
use crate::util::now_millis;

/// Default debounce interval for cursor broadcasts.
pub const CURSOR_BROADCAST_DEFAULT_MS: u64 = 75;
/// Minimum configurable debounce interval.
pub const CURSOR_BROADCAST_MIN_MS: u64 = 50;
/// Maximum configurable debounce interval.
pub const CURSOR_BROADCAST_MAX_MS: u64 = 100;

/// Payload delivered to a scheduled cursor-broadcast callback.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorBroadcast {
    pub id: String,
    pub editor_id: String,
    pub user_id: String,
    pub cursor: Option<Cursor>,
    pub selection: Option<Selection>,
    pub timestamp: u64,
}

/// Callback invoked when a debounced cursor broadcast fires. Errors are
/// logged, never propagated (§4.5).
pub type CursorBroadcastCallback = Arc<dyn Fn(CursorBroadcast) -> CoreResult<()> + Send + Sync>;

struct EditorCore {
    state: EditorState,
    history: OperationHistory,
    cursors: CursorTracker,
    snapshot: Option<EditorSnapshot>,
    last_accessed: Instant,
}

impl EditorCore {
    fn new(content: String) -> Self {
        Self {
            state: EditorState::new(content),
            history: OperationHistory::new(),
            cursors: CursorTracker::new(),
            snapshot: None,
            last_accessed: Instant::now(),
        }
    }
}

/// Per-`editorId` orchestrator for the OT engine's four subcomponents.
pub struct CollaborationEngine {
    editors: DashMap<String, Arc<Mutex<EditorCore>>>,
    timers: Arc<DashMap<(String, String), tokio::task::JoinHandle<()>>>,
    event_bus: Arc<dyn EventBus>,
    id_gen: Arc<dyn IdGenerator>,
    cursor_broadcast_interval: Duration,
}

impl CollaborationEngine {
    pub fn new(event_bus: Arc<dyn EventBus>, id_gen: Arc<dyn IdGenerator>) -> Self {
        Self::with_cursor_broadcast_interval(
            event_bus,
            id_gen,
            Duration::from_millis(CURSOR_BROADCAST_DEFAULT_MS),
        )
    }

    pub fn with_cursor_broadcast_interval(
        event_bus: Arc<dyn EventBus>,
        id_gen: Arc<dyn IdGenerator>,
        interval: Duration,
    ) -> Self {
        let clamped_ms = (interval.as_millis() as u64)
            .max(CURSOR_BROADCAST_MIN_MS)
            .min(CURSOR_BROADCAST_MAX_MS);
        Self {
            editors: DashMap::new(),
            timers: Arc::new(DashMap::new()),
            event_bus,
            id_gen,
            cursor_broadcast_interval: Duration::from_millis(clamped_ms),
        }
    }

    fn editor(&self, editor_id: &str) -> CoreResult<Arc<Mutex<EditorCore>>> {
        self.editors
            .get(editor_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CoreError::CollaborationDisabled(editor_id.to_string()))
    }

    /// Lazily creates the editor if absent; a no-op if it already exists.
    pub fn initialize_editor(&self, editor_id: &str, content: Option<String>) {
        self.editors
            .entry(editor_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EditorCore::new(content.unwrap_or_default()))));
    }

    pub async fn apply_operation(&self, editor_id: &str, op: Operation) -> CoreResult<()> {
        let core_arc = self.editor(editor_id)?;
        let mut core = core_arc.lock().await;
        core.last_accessed = Instant::now();

        let current = core.history.version();
        if op.version != current {
            return Err(CoreError::VersionConflict {
                got: op.version,
                current,
            });
        }

        core.state.apply(&op)?;
        core.cursors.transform_for_operation(&op);
        core.history.append(op.clone());
        drop(core);

        self.event_bus.publish(DomainEvent::OperationApplied {
            editor_id: editor_id.to_string(),
            op,
        });
        Ok(())
    }

    /// Applies each op in `batch` in order. Non-atomic: if op `k` fails, ops
    /// `0..k` remain applied (see the design spec's open question #3).
    pub async fn apply_operation_batch(&self, editor_id: &str, batch: OperationBatch) -> CoreResult<()> {
        batch.validate()?;

        let core_arc = self.editor(editor_id)?;
        let base_ok = {
            let core = core_arc.lock().await;
            batch.base_version == core.history.version()
        };
        if !base_ok {
            let current = core_arc.lock().await.history.version();
            return Err(CoreError::VersionConflict {
                got: batch.base_version,
                current,
            });
        }

        let mut applied = 0usize;
        for op in batch.operations {
            self.apply_operation(editor_id, op).await?;
            applied += 1;
        }

        self.event_bus.publish(DomainEvent::OperationBatchReceived {
            editor_id: editor_id.to_string(),
            batch_id: batch.id,
            operation_count: applied,
        });
        Ok(())
    }

    /// Folds `transform` across `against`, skipping entries from the same
    /// `clientId` as `op` (transform is identity against one's own ops).
    /// Emits [`DomainEvent::OperationConflict`] when the result differs from
    /// the input in `position`, `length`, or `content`.
    pub fn transform_operation(&self, editor_id: &str, op: &Operation, against: &[Operation]) -> CoreResult<Operation> {
        let filtered: Vec<Operation> = against
            .iter()
            .filter(|a| a.client_id != op.client_id)
            .cloned()
            .collect();
        let transformed = OtTransformer::transform_against_many(op, &filtered)?;

        if transformed.position != op.position
            || transformed.length != op.length
            || transformed.content != op.content
        {
            self.event_bus.publish(DomainEvent::OperationConflict {
                editor_id: editor_id.to_string(),
                original: op.clone(),
                transformed: transformed.clone(),
            });
        }
        Ok(transformed)
    }

    pub async fn add_remote_user(&self, editor_id: &str, user: RemoteUser) -> CoreResult<()> {
        let core_arc = self.editor(editor_id)?;
        let user_id = user.id.clone();
        core_arc.lock().await.cursors.add_user(user);
        self.event_bus.publish(DomainEvent::RemoteUserConnected {
            editor_id: editor_id.to_string(),
            user_id,
        });
        Ok(())
    }

    pub async fn remove_remote_user(&self, editor_id: &str, user_id: &str) -> CoreResult<()> {
        let core_arc = self.editor(editor_id)?;
        core_arc.lock().await.cursors.remove_user(user_id);
        self.event_bus.publish(DomainEvent::RemoteUserDisconnected {
            editor_id: editor_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    pub async fn update_remote_user_cursor(
        &self,
        editor_id: &str,
        user_id: &str,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
        broadcast: Option<CursorBroadcastCallback>,
    ) -> CoreResult<()> {
        let core_arc = self.editor(editor_id)?;
        {
            let mut core = core_arc.lock().await;
            let content_len = core.state.content().chars().count();
            core.cursors
                .update_cursor(user_id, cursor, selection, now_millis(), content_len)?;
        }

        self.event_bus.publish(DomainEvent::CursorUpdated {
            editor_id: editor_id.to_string(),
            user_id: user_id.to_string(),
            cursor,
            selection,
        });

        if let Some(cb) = broadcast {
            self.schedule_cursor_broadcast(editor_id, user_id, cursor, selection, cb);
        }
        Ok(())
    }

    pub async fn create_snapshot(&self, editor_id: &str, client_id: &str) -> CoreResult<EditorSnapshot> {
        let core_arc = self.editor(editor_id)?;
        let mut core = core_arc.lock().await;
        let snapshot = EditorSnapshot {
            id: self.id_gen.next_id(),
            content: core.state.content().to_string(),
            version: core.history.version(),
            timestamp: now_millis(),
            client_id: client_id.to_string(),
        };
        core.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Debounces cursor broadcasts per `(editorId, userId)`: cancels any
    /// pending timer for the key and installs a new one.
    pub fn schedule_cursor_broadcast(
        &self,
        editor_id: &str,
        user_id: &str,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
        cb: CursorBroadcastCallback,
    ) {
        let key = (editor_id.to_string(), user_id.to_string());
        if let Some((_, handle)) = self.timers.remove(&key) {
            handle.abort();
        }

        let id_gen = self.id_gen.clone();
        let timers = self.timers.clone();
        let interval = self.cursor_broadcast_interval;
        let spawn_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let broadcast = CursorBroadcast {
                id: id_gen.next_id(),
                editor_id: spawn_key.0.clone(),
                user_id: spawn_key.1.clone(),
                cursor,
                selection,
                timestamp: now_millis(),
            };
            if let Err(e) = cb(broadcast) {
                tracing::warn!(error = %e, "cursor broadcast callback failed");
            }
            timers.remove(&spawn_key);
        });

        self.timers.insert(key, handle);
    }

    pub fn clear_cursor_broadcast(&self, editor_id: &str, user_id: &str) {
        let key = (editor_id.to_string(), user_id.to_string());
        if let Some((_, handle)) = self.timers.remove(&key) {
            handle.abort();
        }
    }

    pub fn has_pending_cursor_broadcast(&self, editor_id: &str, user_id: &str) -> bool {
        self.timers.contains_key(&(editor_id.to_string(), user_id.to_string()))
    }

    /// Clears content, history, remote users, snapshot, and every pending
    /// timer belonging to `editor_id`.
    pub async fn reset(&self, editor_id: &str) {
        if let Ok(core_arc) = self.editor(editor_id) {
            let mut core = core_arc.lock().await;
            core.state.reset();
            core.history.clear();
            core.cursors.clear();
            core.snapshot = None;
        }

        let stale_keys: Vec<(String, String)> = self
            .timers
            .iter()
            .filter(|entry| entry.key().0 == editor_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale_keys {
            if let Some((_, handle)) = self.timers.remove(&key) {
                handle.abort();
            }
        }
    }

    pub async fn get_editor_content(&self, editor_id: &str) -> Option<String> {
        let core_arc = self.editor(editor_id).ok()?;
        Some(core_arc.lock().await.state.content().to_string())
    }

    pub async fn get_version(&self, editor_id: &str) -> Option<u64> {
        let core_arc = self.editor(editor_id).ok()?;
        Some(core_arc.lock().await.history.version())
    }

    pub async fn get_active_remote_users(&self, editor_id: &str) -> Vec<RemoteUser> {
        let Ok(core_arc) = self.editor(editor_id) else {
            return Vec::new();
        };
        core_arc
            .lock()
            .await
            .cursors
            .get_active_remote_users()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn snapshot_versions(&self) -> HashMap<String, u64> {
        let mut out = HashMap::new();
        for entry in self.editors.iter() {
            out.insert(entry.key().clone(), entry.value().lock().await.history.version());
        }
        out
    }

    /// Lists editors untouched for longer than `idle_for`, without removing
    /// them. Lets a caller (the cleaner task) snapshot an editor to storage
    /// before `prune_idle` drops it.
    pub async fn idle_editor_ids(&self, idle_for: Duration) -> Vec<String> {
        let mut stale = Vec::new();
        for entry in self.editors.iter() {
            if entry.value().lock().await.last_accessed.elapsed() > idle_for {
                stale.push(entry.key().clone());
            }
        }
        stale
    }

    /// Evicts editors untouched for longer than `idle_for`, aborting any
    /// pending cursor-broadcast timers that belong to them. Mirrors the
    /// teacher's hourly document cleaner, generalized to `editorId`.
    pub async fn prune_idle(&self, idle_for: Duration) -> Vec<String> {
        let stale = self.idle_editor_ids(idle_for).await;
        for editor_id in &stale {
            self.editors.remove(editor_id);
            let keys: Vec<(String, String)> = self
                .timers
                .iter()
                .filter(|entry| &entry.key().0 == editor_id)
                .map(|entry| entry.key().clone())
                .collect();
            for key in keys {
                if let Some((_, handle)) = self.timers.remove(&key) {
                    handle.abort();
                }
            }
        }
        stale
    }

    pub fn editor_count(&self) -> usize {
        self.editors.len()
    }
}
