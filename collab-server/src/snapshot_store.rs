//! Persistence collaborator: snapshot/restore for editor state.
//!
//! The engine itself is in-memory only (§1 out-of-scope: persistence). This
//! module supplies the concrete default implementations of that collaborator
//! so the crate runs standalone, the same role `database.rs`'s `Database`
//! plays for the teacher's documents.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use crate::ot::model::EditorSnapshot;

/// Loads and stores [`EditorSnapshot`]s keyed by `editorId`. `EditorSnapshot`
/// itself carries no `editorId` field (it's an id-less point-in-time capture,
/// per the data model), so callers address it explicitly — mirroring the
/// teacher's `Database::load_document(document_id)` / `store_document(document_id, document)`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, editor_id: &str) -> Result<Option<EditorSnapshot>>;
    async fn store(&self, editor_id: &str, snapshot: &EditorSnapshot) -> Result<()>;
}

/// Default store: nothing survives a restart. Sufficient standalone; a real
/// deployment plugs in [`FileSnapshotStore`] or its own collaborator.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, EditorSnapshot>>,
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, editor_id: &str) -> Result<Option<EditorSnapshot>> {
        Ok(self.snapshots.lock().unwrap().get(editor_id).cloned())
    }

    async fn store(&self, editor_id: &str, snapshot: &EditorSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap()
            .insert(editor_id.to_string(), snapshot.clone());
        Ok(())
    }
}

/// Flat-file JSON store, one file per editor, grounded on `database.rs`'s
/// document directory layout (minus the SQL/ORM machinery it never had
/// either).
pub struct FileSnapshotStore {
    directory: PathBuf,
}

impl FileSnapshotStore {
    /// Opens (creating if absent) a directory of `<editorId>.json` files.
    pub async fn new(directory: PathBuf) -> Result<Self> {
        if !directory.exists() {
            fs::create_dir_all(&directory).await?;
        }
        Ok(Self { directory })
    }

    fn path_for(&self, editor_id: &str) -> PathBuf {
        self.directory.join(format!("{editor_id}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, editor_id: &str) -> Result<Option<EditorSnapshot>> {
        let path = self.path_for(editor_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading snapshot for {editor_id}"))?;
        match serde_json::from_str(&data) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                warn!(%editor_id, %err, "discarding unreadable snapshot file");
                Ok(None)
            }
        }
    }

    async fn store(&self, editor_id: &str, snapshot: &EditorSnapshot) -> Result<()> {
        let path = self.path_for(editor_id);
        let data = serde_json::to_string_pretty(snapshot)?;
        fs::write(path, data)
            .await
            .with_context(|| format!("writing snapshot for {editor_id}"))
    }
}
