use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::{SessionPhase, SessionState};
use crate::imaging::EditableImage;
use crate::pipeline::instruction::{SelectionArea, SelectionSpec};
use crate::pipeline::service::DetectedElement;

pub const SNAPSHOT_VERSION: u32 = 1;
pub const DEFAULT_SNAPSHOT_MAX_BYTES: usize = 16 * 1024 * 1024;

const SNAPSHOT_KEY: &str = "current";

/// Persisted projection of [`SessionState`]. Busy flags, errors and the
/// replacement image are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub saved_at: String,
    #[serde(default)]
    pub original: Option<EditableImage>,
    #[serde(default)]
    pub edited: Option<EditableImage>,
    #[serde(default)]
    pub removed_layer: Option<EditableImage>,
    #[serde(default)]
    pub detected_elements: Vec<DetectedElement>,
    #[serde(default)]
    pub custom_instruction: String,
    #[serde(default)]
    pub selected_elements: Vec<String>,
    #[serde(default)]
    pub selection: Option<SelectionArea>,
}

impl SessionSnapshot {
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now().to_rfc3339(),
            original: state.original.clone(),
            edited: state.edited.clone(),
            removed_layer: state.removed_layer.clone(),
            detected_elements: state.detected_elements.clone(),
            custom_instruction: state.selection.custom_instruction.clone(),
            selected_elements: state.selection.selected_elements.clone(),
            selection: state.selection.area,
        }
    }

    /// Restored sessions come back idle: Ready with an image, Empty without.
    pub fn into_state(self, generation: u64) -> SessionState {
        let phase = if self.original.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::Empty
        };
        SessionState {
            phase,
            generation,
            original: self.original,
            edited: self.edited,
            removed_layer: self.removed_layer,
            replacement: None,
            detected_elements: self.detected_elements,
            selection: SelectionSpec {
                selected_elements: self.selected_elements,
                area: self.selection,
                custom_instruction: self.custom_instruction,
            },
            error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_none()
            && self.custom_instruction.is_empty()
            && self.detected_elements.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot of {size} bytes exceeds the {limit} byte limit")]
    CapacityExceeded { size: usize, limit: usize },
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot store lock poisoned")]
    Poisoned,
}

/// Best-effort persistence of the current session. `load` yields `None` when
/// nothing usable is stored.
pub trait SessionStore: Send + Sync + 'static {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError>;
    fn load(&self) -> Option<SessionSnapshot>;
    fn clear(&self) -> Result<(), PersistenceError>;
}

pub type SharedSessionStore = Arc<dyn SessionStore>;

fn encode_snapshot(snapshot: &SessionSnapshot, limit: usize) -> Result<String, PersistenceError> {
    let payload = serde_json::to_string(snapshot)?;
    if payload.len() > limit {
        return Err(PersistenceError::CapacityExceeded {
            size: payload.len(),
            limit,
        });
    }
    Ok(payload)
}

fn decode_snapshot(payload: &str) -> Option<SessionSnapshot> {
    match serde_json::from_str::<SessionSnapshot>(payload) {
        Ok(snapshot) if snapshot.version <= SNAPSHOT_VERSION => Some(snapshot),
        Ok(snapshot) => {
            warn!(
                version = snapshot.version,
                "ignoring session snapshot from a newer version"
            );
            None
        }
        Err(error) => {
            warn!(error = %error, "ignoring unparseable session snapshot");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db_path: PathBuf,
    max_bytes: usize,
}

impl SqliteSessionStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_bytes: DEFAULT_SNAPSHOT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn initialize(&self) -> Result<(), PersistenceError> {
        self.with_connection(|_| Ok(()))
    }

    fn with_connection<T, F>(&self, func: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Connection) -> Result<T, PersistenceError>,
    {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(self.db_path.as_path())?;
        ensure_schema(&conn)?;
        func(&conn)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS session_snapshots (
          key TEXT PRIMARY KEY,
          payload_json TEXT NOT NULL,
          saved_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

impl SessionStore for SqliteSessionStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        let payload = encode_snapshot(snapshot, self.max_bytes)?;
        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO session_snapshots (key, payload_json, saved_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                  payload_json = excluded.payload_json,
                  saved_at = excluded.saved_at
                ",
                params![SNAPSHOT_KEY, payload, snapshot.saved_at],
            )?;
            Ok(())
        })
    }

    fn load(&self) -> Option<SessionSnapshot> {
        let payload = self.with_connection(|conn| {
            conn.query_row(
                "SELECT payload_json FROM session_snapshots WHERE key = ?1",
                params![SNAPSHOT_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(PersistenceError::from)
        });
        match payload {
            Ok(Some(payload)) => decode_snapshot(payload.as_str()),
            Ok(None) => None,
            Err(error) => {
                warn!(error = %error, path = %self.db_path.display(), "session snapshot load failed");
                None
            }
        }
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM session_snapshots WHERE key = ?1",
                params![SNAPSHOT_KEY],
            )?;
            Ok(())
        })
    }
}

/// Keeps the serialized snapshot in memory; same size limit semantics as the
/// SQLite store.
#[derive(Debug)]
pub struct MemorySessionStore {
    payload: Mutex<Option<String>>,
    max_bytes: usize,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_MAX_BYTES)
    }
}

impl MemorySessionStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            payload: Mutex::new(None),
            max_bytes,
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.payload.lock().map(|p| p.is_some()).unwrap_or(false)
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        let payload = encode_snapshot(snapshot, self.max_bytes)?;
        *self.payload.lock().map_err(|_| PersistenceError::Poisoned)? = Some(payload);
        Ok(())
    }

    fn load(&self) -> Option<SessionSnapshot> {
        let guard = self.payload.lock().ok()?;
        decode_snapshot(guard.as_deref()?)
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        *self.payload.lock().map_err(|_| PersistenceError::Poisoned)? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::imaging::png_fixture;
    use crate::pipeline::service::ElementKind;

    fn populated_state() -> SessionState {
        SessionState {
            phase: SessionPhase::Editing,
            generation: 4,
            original: Some(png_fixture(3, 3, [1, 2, 3, 255])),
            edited: Some(png_fixture(3, 3, [4, 5, 6, 255])),
            removed_layer: None,
            replacement: Some(png_fixture(1, 1, [7, 7, 7, 255])),
            detected_elements: vec![DetectedElement {
                name: String::from("Logo"),
                kind: ElementKind::Logo,
            }],
            selection: SelectionSpec {
                selected_elements: vec![String::from("Logo")],
                area: Some(SelectionArea {
                    x: 1.0,
                    y: 2.0,
                    width: 3.0,
                    height: 4.0,
                    frame_width: 10.0,
                    frame_height: 10.0,
                }),
                custom_instruction: String::from("make it pop"),
            },
            error: Some(String::from("transient")),
        }
    }

    fn temp_db() -> PathBuf {
        std::env::temp_dir()
            .join(format!("thumb_editor_store_test_{}", Uuid::new_v4()))
            .join("var/backend/session.db")
    }

    #[test]
    fn sqlite_round_trip_preserves_persisted_fields() {
        let store = SqliteSessionStore::new(temp_db());
        store.initialize().expect("schema should initialize");
        let snapshot = SessionSnapshot::from_state(&populated_state());

        store.save(&snapshot).expect("save should succeed");
        let loaded = store.load().expect("snapshot should load");
        assert_eq!(loaded, snapshot);

        let restored = loaded.into_state(9);
        assert_eq!(restored.phase, SessionPhase::Ready);
        assert_eq!(restored.error, None);
        assert_eq!(restored.replacement, None);
        assert_eq!(restored.selection, populated_state().selection);
    }

    #[test]
    fn sqlite_clear_removes_snapshot() {
        let store = SqliteSessionStore::new(temp_db());
        store
            .save(&SessionSnapshot::from_state(&populated_state()))
            .expect("save");
        store.clear().expect("clear");
        assert_eq!(store.load(), None);
    }

    #[test]
    fn oversized_snapshot_is_rejected() {
        let store = MemorySessionStore::new(64);
        let err = store
            .save(&SessionSnapshot::from_state(&populated_state()))
            .expect_err("limit should be hit");
        assert!(matches!(err, PersistenceError::CapacityExceeded { limit: 64, .. }));
        assert!(!store.has_snapshot());
    }

    #[test]
    fn unparseable_payload_loads_as_none() {
        let store = SqliteSessionStore::new(temp_db());
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO session_snapshots (key, payload_json, saved_at) VALUES (?1, ?2, ?3)",
                    params![SNAPSHOT_KEY, "{not json", "now"],
                )?;
                Ok(())
            })
            .expect("raw insert");
        assert_eq!(store.load(), None);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySessionStore::default();
        assert_eq!(store.load(), None);
        let snapshot = SessionSnapshot::from_state(&populated_state());
        store.save(&snapshot).expect("save");
        assert_eq!(store.load(), Some(snapshot));
    }
}
