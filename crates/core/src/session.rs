//! Session, Event and State domain types.
//!
//! A [`Session`] is one persisted conversation thread: an append-only event
//! log plus a mutable key/value state map. Keys prefixed with `user:` are
//! user-scoped (the store shares them across every session of the same
//! user); everything else is visible only within the session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Author name used for events produced by the end user.
pub const USER_AUTHOR: &str = "user";

/// Reserved event text meaning "a human operator is handling this turn".
///
/// Never part of a transcript and never summarized.
pub const AI_PAUSED_SENTINEL: &str = "__AI_PAUSED__";

/// Prefix marking a state key as user-scoped.
pub const USER_SCOPE_PREFIX: &str = "user:";

/// Prefix marking a state key as internal (hidden from introspection).
pub const INTERNAL_PREFIX: &str = "_";

/// Well-known state keys.
pub mod keys {
    /// Summary of older events of this session.
    pub const CONVERSATION_SUMMARY: &str = "conversation_summary";
    /// How many events are folded into `conversation_summary`.
    pub const SUMMARY_EVENT_COUNT: &str = "summary_event_count";
    /// Newest summary, carried into the user's next session.
    pub const USER_SUMMARY: &str = "user:conversation_summary";
    /// RFC 3339 timestamp of the most recent compaction.
    pub const LAST_SUMMARIZED_AT: &str = "last_summarized_at";
    /// Human takeover flag.
    pub const AI_PAUSED: &str = "ai_paused";
    /// Total events after the last completed turn.
    pub const MESSAGE_COUNT: &str = "message_count";
    /// First 100 characters of the newest user message.
    pub const LAST_MESSAGE_PREVIEW: &str = "last_message_preview";
    /// Inbox read marker; absent means read.
    pub const IS_READ: &str = "is_read";
}

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first 8 characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Events ──────────────────────────────────────────────────────────────────

/// One segment of an event's content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    /// Raw text if present and non-empty.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Trimmed text if it carries real conversational content.
    pub fn usable_text(&self) -> Option<&str> {
        let text = self.text.as_deref()?.trim();
        if text.is_empty() || text == AI_PAUSED_SENTINEL {
            None
        } else {
            Some(text)
        }
    }
}

/// One turn's contribution to the transcript. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,

    /// `"user"` or the name of the agent that spoke.
    pub author: String,

    #[serde(default)]
    pub content: Vec<Part>,

    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(author: impl Into<String>, content: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: author.into(),
            content,
            timestamp: Utc::now(),
        }
    }

    /// A single-part event authored by the end user.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(USER_AUTHOR, vec![Part::text(text)])
    }

    /// A single-part event authored by an agent.
    pub fn agent(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(author, vec![Part::text(text)])
    }

    /// The "human operator took over" marker event.
    pub fn paused(author: impl Into<String>) -> Self {
        Self::agent(author, AI_PAUSED_SENTINEL)
    }

    pub fn is_from_user(&self) -> bool {
        self.author == USER_AUTHOR
    }

    /// Usable parts joined with a single space; `None` if nothing usable.
    pub fn usable_text(&self) -> Option<String> {
        let parts: Vec<&str> = self.content.iter().filter_map(Part::usable_text).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

// ── State ───────────────────────────────────────────────────────────────────

/// Typed view over a session's key/value state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(Map<String, Value>);

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A string value, treating empty strings as absent.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn conversation_summary(&self) -> Option<&str> {
        self.get_str(keys::CONVERSATION_SUMMARY)
    }

    pub fn user_summary(&self) -> Option<&str> {
        self.get_str(keys::USER_SUMMARY)
    }

    /// Events already folded into the summary (0 when unset or malformed).
    pub fn summary_event_count(&self) -> usize {
        self.0
            .get(keys::SUMMARY_EVENT_COUNT)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    pub fn last_summarized_at(&self) -> Option<&str> {
        self.get_str(keys::LAST_SUMMARIZED_AT)
    }

    pub fn ai_paused(&self) -> bool {
        self.0
            .get(keys::AI_PAUSED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Split into (session-scoped, user-scoped) entries.
    pub fn split_scopes(self) -> (Map<String, Value>, Map<String, Value>) {
        let mut session = Map::new();
        let mut user = Map::new();
        for (key, value) in self.0 {
            if is_user_scoped(&key) {
                user.insert(key, value);
            } else {
                session.insert(key, value);
            }
        }
        (session, user)
    }

    /// Overlay user-scoped entries shared by the user's sessions.
    pub fn merge_user_scope(&mut self, user: &Map<String, Value>) {
        for (key, value) in user {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// State without internal (`_`-prefixed) keys.
    pub fn public(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(k, _)| !k.starts_with(INTERNAL_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Whether a key lives in the user scope.
pub fn is_user_scoped(key: &str) -> bool {
    key.starts_with(USER_SCOPE_PREFIX)
}

// ── Session ─────────────────────────────────────────────────────────────────

/// One persisted conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub app_name: String,
    pub user_id: String,

    /// Append-only; insertion order is semantic.
    #[serde(default)]
    pub events: Vec<Event>,

    #[serde(default)]
    pub state: SessionState,

    pub created_at: DateTime<Utc>,

    /// Drives retention age.
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            events: Vec::new(),
            state: SessionState::new(),
            created_at: now,
            last_update_time: now,
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Time elapsed since the last mutation.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_update_time
    }

    /// Age in days, rounded to one decimal place.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let days = self.age(now).num_seconds() as f64 / 86_400.0;
        (days * 10.0).round() / 10.0
    }

    /// The newest user-authored text, if any.
    pub fn last_user_text(&self) -> Option<String> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.is_from_user())
            .find_map(Event::usable_text)
    }
}
