//! Persistence backend for chat state
//!
//! The store persists itself through a small key/value abstraction with
//! fixed keys, mirroring the browser-local storage it replaces. The
//! live scheme writes plain JSON under three keys; a legacy scheme that
//! ran the data through [`crate::codec`] under different keys is still
//! readable and imported once when the primary keys are absent.

use crate::codec;
use crate::error::{NimbusError, Result};
use crate::store::types::{ChatMessage, SessionMetadata};
use chrono::Utc;
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Key holding the JSON map of session id to message sequence
pub const SESSIONS_KEY: &str = "chat_sessions";

/// Key holding the JSON map of session id to metadata record
pub const METADATA_KEY: &str = "session_metadata";

/// Key holding the current session id as a plain string
pub const CURRENT_SESSION_KEY: &str = "current_session_id";

/// Legacy key holding the codec-encoded thread map
pub const LEGACY_THREADS_KEY: &str = "weather-chat-threads";

/// Legacy key holding the codec-encoded selected thread id
pub const LEGACY_SELECTED_KEY: &str = "weather-chat-selected";

/// String key/value storage medium for chat state
///
/// The store only ever reads and writes whole values under fixed keys,
/// so the backend surface is deliberately tiny.
pub trait StateStore: Send + Sync {
    /// Read the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`, if any
    fn remove(&self, key: &str) -> Result<()>;
}

/// Sled-backed state storage
///
/// Durable backend used in production. Writes flush immediately so a
/// crash never loses more than the in-flight mutation.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open the store at the default platform data directory
    ///
    /// The `NIMBUS_STATE_DB` environment variable overrides the
    /// location, which makes it easy to point at a test database
    /// without touching the user's application data.
    pub fn open_default() -> Result<Self> {
        if let Ok(override_path) = std::env::var("NIMBUS_STATE_DB") {
            return Self::open(override_path);
        }

        let proj_dirs = ProjectDirs::from("io", "nimbus-chat", "nimbus")
            .ok_or_else(|| NimbusError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| NimbusError::Storage(format!("Failed to create data directory: {}", e)))?;

        Self::open(data_dir.join("state.db"))
    }

    /// Open the store at a specific path
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nimbus::store::SledStore;
    ///
    /// # fn main() -> nimbus::error::Result<()> {
    /// let backend = SledStore::open("/tmp/nimbus-state.db")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| NimbusError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }
}

impl StateStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self
            .db
            .get(key)
            .map_err(|e| NimbusError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec())
                    .map_err(|e| NimbusError::Storage(format!("Non-UTF8 value: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key, value.as_bytes())
            .map_err(|e| NimbusError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| NimbusError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key)
            .map_err(|e| NimbusError::Storage(format!("Remove failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| NimbusError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

/// In-memory state storage for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// In-memory image of the persisted chat state
#[derive(Debug, Default)]
pub struct StoreSnapshot {
    /// Session id to message sequence
    pub sessions: HashMap<String, Vec<ChatMessage>>,
    /// Session id to metadata record
    pub metadata: HashMap<String, SessionMetadata>,
    /// Current session pointer
    pub current_session_id: Option<String>,
}

/// Message shape used by the legacy persisted scheme
#[derive(Debug, Deserialize)]
struct LegacyThreadMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

/// Load the persisted snapshot from a backend
///
/// The three primary keys are parsed independently; a read or parse
/// failure on any key falls back to defaults for that key rather than
/// failing the load. When the primary session key is entirely absent,
/// the legacy codec-encoded scheme is consulted as a one-time import.
/// The current session pointer is only honored when it keys a loaded
/// session.
pub fn load_snapshot(backend: &dyn StateStore) -> StoreSnapshot {
    let mut snapshot = StoreSnapshot::default();
    let mut had_primary = false;

    match backend.get(SESSIONS_KEY) {
        Ok(Some(raw)) => {
            had_primary = true;
            match serde_json::from_str(&raw) {
                Ok(sessions) => snapshot.sessions = sessions,
                Err(e) => tracing::warn!("discarding malformed session data: {}", e),
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("failed to read persisted sessions: {}", e),
    }

    match backend.get(METADATA_KEY) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(metadata) => snapshot.metadata = metadata,
            Err(e) => tracing::warn!("discarding malformed session metadata: {}", e),
        },
        Ok(None) => {}
        Err(e) => tracing::warn!("failed to read persisted metadata: {}", e),
    }

    match backend.get(CURRENT_SESSION_KEY) {
        Ok(current) => snapshot.current_session_id = current,
        Err(e) => tracing::warn!("failed to read current session id: {}", e),
    }

    if !had_primary {
        import_legacy(backend, &mut snapshot);
    }

    // Synthesize metadata for sessions persisted without a record so the
    // count invariant holds from the first mutation onward.
    for (id, messages) in &snapshot.sessions {
        snapshot
            .metadata
            .entry(id.clone())
            .or_insert_with(|| SessionMetadata::synthesized(messages.len()));
    }

    let current_is_valid = snapshot
        .current_session_id
        .as_ref()
        .map(|id| snapshot.sessions.contains_key(id))
        .unwrap_or(false);
    if !current_is_valid {
        snapshot.current_session_id = None;
    }

    snapshot
}

/// Import the legacy codec-encoded thread scheme, if present
///
/// Legacy threads carry role/content messages without timestamps or
/// metadata; both are synthesized at import time. The legacy keys are
/// never written back.
fn import_legacy(backend: &dyn StateStore, snapshot: &mut StoreSnapshot) {
    let raw = match backend.get(LEGACY_THREADS_KEY) {
        Ok(Some(raw)) => raw,
        _ => return,
    };

    let threads: HashMap<String, Vec<LegacyThreadMessage>> =
        match codec::decode(&raw, codec::DEFAULT_KEY) {
            Some(threads) => threads,
            None => {
                tracing::warn!("legacy thread data present but undecodable, ignoring");
                return;
            }
        };

    tracing::info!(threads = threads.len(), "importing legacy chat threads");

    let now = Utc::now();
    for (id, messages) in threads {
        let converted: Vec<ChatMessage> = messages
            .into_iter()
            .map(|m| ChatMessage {
                is_user: m.role == "user",
                message: m.content,
                timestamp: now,
            })
            .collect();
        snapshot
            .metadata
            .insert(id.clone(), SessionMetadata::synthesized(converted.len()));
        snapshot.sessions.insert(id, converted);
    }

    if let Ok(Some(raw)) = backend.get(LEGACY_SELECTED_KEY) {
        if let Some(selected) = codec::decode::<String>(&raw, codec::DEFAULT_KEY) {
            snapshot.current_session_id = Some(selected);
        }
    }
}
