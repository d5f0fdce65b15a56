//! Reactive session store
//!
//! The central state container for the chat client: every conversation,
//! its metadata, and the single "current" session pointer live here.
//! Mutations are synchronous end-to-end: the state changes, the full
//! snapshot persists to the backend, and subscribers are notified, all
//! before the call returns. Persistence failures are logged and never
//! abort a mutation; subscriber panics are caught and never propagate.
//!
//! The store is an explicit service object: construct one from a
//! [`StateStore`] backend and hand clones to whoever needs it. All
//! clones share state through a single lock.

pub mod persist;
pub mod types;

pub use persist::{MemoryStore, SledStore, StateStore};
pub use types::{
    ChatMessage, SessionEntry, SessionMetadata, NEW_SESSION_TITLE, UNTITLED_SESSION_TITLE,
};

use crate::error::Result;
use crate::title;
use chrono::Utc;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

type Listener = Arc<dyn Fn() + Send + Sync>;

struct StoreState {
    sessions: HashMap<String, Vec<ChatMessage>>,
    metadata: HashMap<String, SessionMetadata>,
    current_session_id: Option<String>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    backend: Box<dyn StateStore>,
}

/// Handle to a registered store listener
///
/// Returned by [`SessionStore::subscribe`]. Call [`unsubscribe`] to
/// remove the listener; simply dropping the handle leaves the listener
/// registered for the life of the store.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    inner: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    /// Remove the listener this handle refers to
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// The session store service object
///
/// Cheap to clone; all clones share the same state, backend, and
/// listener registry.
///
/// # Examples
///
/// ```
/// use nimbus::store::{ChatMessage, SessionStore};
///
/// let store = SessionStore::in_memory();
/// store.add_message_to_current_session(ChatMessage::user("What's the weather in Oslo?"));
/// assert_eq!(store.current_messages().len(), 1);
/// ```
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Create a store on the given backend, loading any persisted state
    pub fn new(backend: impl StateStore + 'static) -> Self {
        let snapshot = persist::load_snapshot(&backend);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    sessions: snapshot.sessions,
                    metadata: snapshot.metadata,
                    current_session_id: snapshot.current_session_id,
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                backend: Box::new(backend),
            }),
        }
    }

    /// Create a store backed by volatile memory (tests, previews)
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Create a store on the default durable backend
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(SledStore::open_default()?))
    }

    /// Create a new empty session and make it current
    ///
    /// Always succeeds and returns the fresh session id. The title
    /// defaults to the sentinel, to be replaced when the first user
    /// message arrives.
    pub fn create_session(&self, title: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string();
        {
            let mut state = self.lock_state();
            state.sessions.insert(id.clone(), Vec::new());
            state.metadata.insert(
                id.clone(),
                SessionMetadata::new(title.unwrap_or(NEW_SESSION_TITLE)),
            );
            state.current_session_id = Some(id.clone());
        }
        tracing::debug!(session_id = %id, "created session");
        self.persist_and_notify();
        id
    }

    /// Make an existing session current; unknown ids are ignored
    pub fn switch_to_session(&self, id: &str) {
        let switched = {
            let mut state = self.lock_state();
            if state.sessions.contains_key(id) {
                state.current_session_id = Some(id.to_string());
                true
            } else {
                false
            }
        };
        if switched {
            self.persist_and_notify();
        } else {
            tracing::debug!(session_id = %id, "ignoring switch to unknown session");
        }
    }

    /// Delete a session and its metadata; unknown ids are ignored
    ///
    /// When the deleted session was current, the pointer moves to an
    /// arbitrary remaining session, or to none when the store is empty.
    pub fn delete_session(&self, id: &str) {
        let removed = {
            let mut state = self.lock_state();
            if state.sessions.remove(id).is_none() {
                false
            } else {
                state.metadata.remove(id);
                if state.current_session_id.as_deref() == Some(id) {
                    state.current_session_id = state.sessions.keys().next().cloned();
                }
                true
            }
        };
        if removed {
            tracing::debug!(session_id = %id, "deleted session");
            self.persist_and_notify();
        }
    }

    /// Reset the current session to an empty message sequence
    ///
    /// Identity and title are preserved; `message_count` goes to zero
    /// and `last_activity` is refreshed. No-op without a current
    /// session.
    pub fn clear_current_session(&self) {
        let cleared = {
            let mut state = self.lock_state();
            let Some(id) = state.current_session_id.clone() else {
                return;
            };
            match state.sessions.get_mut(&id) {
                Some(messages) => {
                    messages.clear();
                    if let Some(meta) = state.metadata.get_mut(&id) {
                        meta.message_count = 0;
                        meta.last_activity = Utc::now();
                    }
                    true
                }
                None => false,
            }
        };
        if cleared {
            self.persist_and_notify();
        }
    }

    /// Append a message to the current session
    ///
    /// Creates a session first when none is current. Keeps
    /// `message_count` in step with the sequence length, refreshes
    /// `last_activity`, and derives the title from the first user
    /// message while the sentinel title is still in effect.
    pub fn add_message_to_current_session(&self, message: ChatMessage) {
        if self.current_session_id().is_none() {
            self.create_session(None);
        }
        {
            let mut state = self.lock_state();
            let Some(id) = state.current_session_id.clone() else {
                return;
            };
            let is_user = message.is_user;
            let text = message.message.clone();

            let messages = state.sessions.entry(id.clone()).or_default();
            messages.push(message);
            let count = messages.len();

            if let Some(meta) = state.metadata.get_mut(&id) {
                meta.message_count = count;
                meta.last_activity = Utc::now();
                if is_user && meta.title == NEW_SESSION_TITLE {
                    meta.title = title::derive_title(&text);
                    tracing::debug!(session_id = %id, title = %meta.title, "derived session title");
                }
            }
        }
        self.persist_and_notify();
    }

    /// Replace the entire content of the last message in the current
    /// session
    ///
    /// This is the streaming mutation path: callers pass the full
    /// accumulated text on every call, never a delta. No-op when there
    /// is no current session or it has no messages.
    pub fn update_last_message(&self, full_content: &str) {
        let updated = {
            let mut state = self.lock_state();
            let Some(id) = state.current_session_id.clone() else {
                return;
            };
            match state.sessions.get_mut(&id) {
                Some(messages) if !messages.is_empty() => {
                    if let Some(last) = messages.last_mut() {
                        last.message = full_content.to_string();
                    }
                    if let Some(meta) = state.metadata.get_mut(&id) {
                        meta.last_activity = Utc::now();
                    }
                    true
                }
                _ => false,
            }
        };
        if updated {
            self.persist_and_notify();
        }
    }

    /// Rename a session; unknown ids are ignored
    pub fn rename_session(&self, id: &str, new_title: &str) {
        let renamed = {
            let mut state = self.lock_state();
            match state.metadata.get_mut(id) {
                Some(meta) => {
                    meta.title = new_title.to_string();
                    meta.last_activity = Utc::now();
                    true
                }
                None => false,
            }
        };
        if renamed {
            self.persist_and_notify();
        }
    }

    /// The current session's messages, or an empty sequence
    pub fn current_messages(&self) -> Vec<ChatMessage> {
        let state = self.lock_state();
        state
            .current_session_id
            .as_ref()
            .and_then(|id| state.sessions.get(id))
            .cloned()
            .unwrap_or_default()
    }

    /// The current session id, if any
    pub fn current_session_id(&self) -> Option<String> {
        self.lock_state().current_session_id.clone()
    }

    /// Metadata for a session, if it exists
    pub fn session_metadata(&self, id: &str) -> Option<SessionMetadata> {
        self.lock_state().metadata.get(id).cloned()
    }

    /// Every session, most recently active first
    ///
    /// Sessions persisted without a metadata record get synthesized
    /// defaults in the returned entries; nothing is written back.
    pub fn all_sessions(&self) -> Vec<SessionEntry> {
        let state = self.lock_state();
        let mut entries: Vec<SessionEntry> = state
            .sessions
            .iter()
            .map(|(id, messages)| SessionEntry {
                id: id.clone(),
                messages: messages.clone(),
                metadata: state
                    .metadata
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| SessionMetadata::synthesized(messages.len())),
            })
            .collect();
        entries.sort_by(|a, b| b.metadata.last_activity.cmp(&a.metadata.last_activity));
        entries
    }

    /// Register a listener invoked after every successful
    /// mutation-and-persist cycle
    ///
    /// Listeners run in registration order. A panicking listener is
    /// logged and skipped; it never blocks other listeners or the
    /// mutation that triggered it.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().unwrap()
    }

    /// Persist the full snapshot, then notify listeners in order
    ///
    /// The state lock is released before the backend write and the
    /// listener calls, so listeners may freely read the store.
    fn persist_and_notify(&self) {
        self.persist();

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::error!("session store listener panicked");
            }
        }
    }

    fn persist(&self) {
        let (sessions_json, metadata_json, current) = {
            let state = self.lock_state();
            (
                serde_json::to_string(&state.sessions),
                serde_json::to_string(&state.metadata),
                state.current_session_id.clone(),
            )
        };

        match sessions_json {
            Ok(json) => {
                if let Err(e) = self.inner.backend.set(persist::SESSIONS_KEY, &json) {
                    tracing::warn!("failed to persist sessions: {}", e);
                }
            }
            Err(e) => tracing::warn!("failed to serialize sessions: {}", e),
        }

        match metadata_json {
            Ok(json) => {
                if let Err(e) = self.inner.backend.set(persist::METADATA_KEY, &json) {
                    tracing::warn!("failed to persist metadata: {}", e);
                }
            }
            Err(e) => tracing::warn!("failed to serialize metadata: {}", e),
        }

        if let Some(id) = current {
            if let Err(e) = self.inner.backend.set(persist::CURRENT_SESSION_KEY, &id) {
                tracing::warn!("failed to persist current session id: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Invariant check: metadata count always matches sequence length.
    fn assert_counts_consistent(store: &SessionStore) {
        for entry in store.all_sessions() {
            assert_eq!(
                entry.metadata.message_count,
                entry.messages.len(),
                "count mismatch for session {}",
                entry.id
            );
        }
    }

    #[test]
    fn test_create_session_becomes_current() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        assert_eq!(store.current_session_id(), Some(id.clone()));
        assert_eq!(store.session_metadata(&id).unwrap().title, "New Chat");
        assert_eq!(store.current_messages().len(), 0);
    }

    #[test]
    fn test_create_session_with_explicit_title() {
        let store = SessionStore::in_memory();
        let id = store.create_session(Some("Trip planning"));
        assert_eq!(store.session_metadata(&id).unwrap().title, "Trip planning");
    }

    #[test]
    fn test_switch_to_known_session() {
        let store = SessionStore::in_memory();
        let first = store.create_session(None);
        let second = store.create_session(None);
        assert_eq!(store.current_session_id(), Some(second));

        store.switch_to_session(&first);
        assert_eq!(store.current_session_id(), Some(first));
    }

    #[test]
    fn test_switch_to_unknown_session_is_noop() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.switch_to_session("does-not-exist");
        assert_eq!(store.current_session_id(), Some(id));
    }

    #[test]
    fn test_add_message_without_current_creates_session() {
        let store = SessionStore::in_memory();
        assert!(store.current_session_id().is_none());

        store.add_message_to_current_session(ChatMessage::user("hello"));

        assert!(store.current_session_id().is_some());
        assert_eq!(store.current_messages().len(), 1);
        assert_counts_consistent(&store);
    }

    #[test]
    fn test_first_user_message_derives_title() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.add_message_to_current_session(ChatMessage::user("hi"));
        assert_eq!(store.session_metadata(&id).unwrap().title, "hi");
    }

    #[test]
    fn test_title_derived_exactly_once() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.add_message_to_current_session(ChatMessage::user("first"));
        store.add_message_to_current_session(ChatMessage::user("second"));
        assert_eq!(store.session_metadata(&id).unwrap().title, "first");
    }

    #[test]
    fn test_assistant_message_does_not_set_title() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.add_message_to_current_session(ChatMessage::assistant("greetings"));
        assert_eq!(store.session_metadata(&id).unwrap().title, "New Chat");
    }

    #[test]
    fn test_message_count_tracks_sequence_length() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        for i in 0..5 {
            store.add_message_to_current_session(ChatMessage::user(format!("m{}", i)));
            assert_counts_consistent(&store);
        }
        assert_eq!(store.session_metadata(&id).unwrap().message_count, 5);
    }

    #[test]
    fn test_update_last_message_overwrites_content() {
        let store = SessionStore::in_memory();
        store.create_session(None);
        store.add_message_to_current_session(ChatMessage::assistant_placeholder());

        store.update_last_message("Hello");
        store.update_last_message("Hello world");

        let messages = store.current_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "Hello world");
        assert_counts_consistent(&store);
    }

    #[test]
    fn test_update_last_message_on_empty_session_is_noop() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.update_last_message("ghost content");
        assert_eq!(store.current_messages().len(), 0);
        assert_eq!(store.session_metadata(&id).unwrap().message_count, 0);
    }

    #[test]
    fn test_update_last_message_without_current_is_noop() {
        let store = SessionStore::in_memory();
        store.update_last_message("nobody home");
        assert!(store.current_session_id().is_none());
        assert!(store.all_sessions().is_empty());
    }

    #[test]
    fn test_clear_current_session_resets_messages() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.add_message_to_current_session(ChatMessage::user("hello there friend"));
        store.clear_current_session();

        assert_eq!(store.current_messages().len(), 0);
        let meta = store.session_metadata(&id).unwrap();
        assert_eq!(meta.message_count, 0);
        // Title and identity survive the clear.
        assert_eq!(meta.title, "hello there friend");
        assert_eq!(store.current_session_id(), Some(id));
    }

    #[test]
    fn test_clear_without_current_is_noop() {
        let store = SessionStore::in_memory();
        store.clear_current_session();
        assert!(store.all_sessions().is_empty());
    }

    #[test]
    fn test_delete_current_repoints_to_remaining() {
        let store = SessionStore::in_memory();
        let first = store.create_session(None);
        let second = store.create_session(None);

        store.delete_session(&second);
        assert_eq!(store.current_session_id(), Some(first));
    }

    #[test]
    fn test_delete_only_session_clears_current() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.delete_session(&id);
        assert!(store.current_session_id().is_none());
        assert!(store.all_sessions().is_empty());
    }

    #[test]
    fn test_delete_non_current_keeps_pointer() {
        let store = SessionStore::in_memory();
        let first = store.create_session(None);
        let second = store.create_session(None);

        store.delete_session(&first);
        assert_eq!(store.current_session_id(), Some(second));
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.delete_session("unknown");
        assert_eq!(store.current_session_id(), Some(id));
    }

    #[test]
    fn test_rename_session_updates_title() {
        let store = SessionStore::in_memory();
        let id = store.create_session(None);
        store.rename_session(&id, "Renamed");
        assert_eq!(store.session_metadata(&id).unwrap().title, "Renamed");
    }

    #[test]
    fn test_rename_unknown_is_noop() {
        let store = SessionStore::in_memory();
        store.rename_session("unknown", "Renamed");
        assert!(store.all_sessions().is_empty());
    }

    #[test]
    fn test_all_sessions_sorted_by_last_activity_desc() {
        let store = SessionStore::in_memory();
        let first = store.create_session(None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.create_session(None);
        std::thread::sleep(std::time::Duration::from_millis(5));

        // Touch the first session so it becomes the most recent.
        store.switch_to_session(&first);
        store.add_message_to_current_session(ChatMessage::user("bump"));

        let sessions = store.all_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, first);
        assert_eq!(sessions[1].id, second);
    }

    #[test]
    fn test_subscriber_notified_after_mutation() {
        let store = SessionStore::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let _sub = store.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.create_session(None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.add_message_to_current_session(ChatMessage::user("hi"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reads_do_not_notify() {
        let store = SessionStore::in_memory();
        store.create_session(None);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let _sub = store.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let _ = store.current_messages();
        let _ = store.all_sessions();
        let _ = store.current_session_id();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_noop_mutations_do_not_notify() {
        let store = SessionStore::in_memory();
        store.create_session(None);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let _sub = store.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.switch_to_session("unknown");
        store.delete_session("unknown");
        store.update_last_message("nothing to update");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = SessionStore::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let sub = store.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.create_session(None);
        sub.unsubscribe();
        store.create_session(None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let store = SessionStore::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = store.subscribe(|| panic!("listener bug"));
        let seen = Arc::clone(&calls);
        let _good = store.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.create_session(None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_read_store() {
        let store = SessionStore::in_memory();
        let observed = Arc::new(AtomicUsize::new(0));

        let reader = store.clone();
        let seen = Arc::clone(&observed);
        let _sub = store.subscribe(move || {
            seen.store(reader.current_messages().len(), Ordering::SeqCst);
        });

        store.add_message_to_current_session(ChatMessage::user("hi"));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_survives_reload_from_backend() {
        let backend = Arc::new(MemoryStore::new());

        struct SharedBackend(Arc<MemoryStore>);
        impl StateStore for SharedBackend {
            fn get(&self, key: &str) -> Result<Option<String>> {
                self.0.get(key)
            }
            fn set(&self, key: &str, value: &str) -> Result<()> {
                self.0.set(key, value)
            }
            fn remove(&self, key: &str) -> Result<()> {
                self.0.remove(key)
            }
        }

        let id = {
            let store = SessionStore::new(SharedBackend(Arc::clone(&backend)));
            let id = store.create_session(None);
            store.add_message_to_current_session(ChatMessage::user("persisted?"));
            id
        };

        let reloaded = SessionStore::new(SharedBackend(backend));
        assert_eq!(reloaded.current_session_id(), Some(id));
        assert_eq!(reloaded.current_messages().len(), 1);
        assert_eq!(reloaded.current_messages()[0].message, "persisted?");
        assert_counts_consistent(&reloaded);
    }

    #[test]
    fn test_clones_share_state() {
        let store = SessionStore::in_memory();
        let clone = store.clone();

        let id = store.create_session(None);
        assert_eq!(clone.current_session_id(), Some(id));

        clone.add_message_to_current_session(ChatMessage::user("shared"));
        assert_eq!(store.current_messages().len(), 1);
    }
}
