//! Data model for sessions and messages
//!
//! Field names serialize in camelCase so the persisted layout matches
//! the established on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel title given to a freshly created session, replaced by the
/// derived title on the first user message
pub const NEW_SESSION_TITLE: &str = "New Chat";

/// Title synthesized for sessions persisted without a metadata record
pub const UNTITLED_SESSION_TITLE: &str = "Untitled Chat";

/// A single message within a session
///
/// Assistant messages are created empty and mutated in place while the
/// response streams in; every other message is immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// True for user messages, false for assistant messages
    pub is_user: bool,
    /// Message text
    pub message: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a user message stamped with the current time
    ///
    /// # Examples
    ///
    /// ```
    /// use nimbus::store::ChatMessage;
    ///
    /// let msg = ChatMessage::user("What is the weather in Oslo?");
    /// assert!(msg.is_user);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            is_user: true,
            message: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates an assistant message stamped with the current time
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            is_user: false,
            message: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates the empty assistant message that streaming fills in
    pub fn assistant_placeholder() -> Self {
        Self::assistant("")
    }
}

/// Metadata for a stored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// User-friendly title (or the sentinel until derived)
    pub title: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session last changed
    pub last_activity: DateTime<Utc>,
    /// Number of messages in the session; always equals the length of
    /// the message sequence
    pub message_count: usize,
}

impl SessionMetadata {
    /// Creates metadata for a brand-new, empty session
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            title: title.into(),
            created_at: now,
            last_activity: now,
            message_count: 0,
        }
    }

    /// Default metadata for a session persisted without a record
    pub(crate) fn synthesized(message_count: usize) -> Self {
        let now = Utc::now();
        Self {
            title: UNTITLED_SESSION_TITLE.to_string(),
            created_at: now,
            last_activity: now,
            message_count,
        }
    }
}

/// One session with its id, messages, and metadata
///
/// The row shape returned by [`SessionStore::all_sessions`].
///
/// [`SessionStore::all_sessions`]: crate::store::SessionStore::all_sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Opaque unique session id
    pub id: String,
    /// Ordered message sequence
    pub messages: Vec<ChatMessage>,
    /// Session metadata (synthesized when the record was missing)
    pub metadata: SessionMetadata,
}
