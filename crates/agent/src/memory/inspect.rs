//! Read-only memory projection of a session, for operators.

use crate::memory::token::TokenEstimator;
use chrono::{DateTime, Utc};
use mnemo_core::session::{Session, keys};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What the memory layer knows about one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemoryInfo {
    pub conversation_id: String,
    pub user_id: String,
    pub event_count: usize,
    pub estimated_tokens_raw_events: usize,
    pub estimated_tokens_summary: usize,
    pub has_summary: bool,
    pub summary: Option<String>,
    pub summary_covers_events: usize,
    pub last_summarized_at: Option<String>,
    pub user_cross_session_summary: Option<String>,
    pub state_keys: Vec<String>,
    /// State without internal keys.
    pub state: Map<String, Value>,
    pub last_activity: DateTime<Utc>,
    pub session_age_days: f64,
    pub ai_paused: bool,
    pub is_read: bool,
}

impl SessionMemoryInfo {
    /// Project `session` as seen at `now`.
    pub fn from_session(session: &Session, estimator: &TokenEstimator, now: DateTime<Utc>) -> Self {
        let state = &session.state;
        let summary = state.conversation_summary().map(str::to_string);

        Self {
            conversation_id: session.id.to_string(),
            user_id: session.user_id.clone(),
            event_count: session.event_count(),
            estimated_tokens_raw_events: estimator.estimate_events(&session.events),
            estimated_tokens_summary: summary.as_deref().map_or(0, |s| estimator.estimate(s)),
            has_summary: summary.is_some(),
            summary,
            summary_covers_events: state.summary_event_count(),
            last_summarized_at: state.last_summarized_at().map(str::to_string),
            user_cross_session_summary: state.user_summary().map(str::to_string),
            state_keys: state.keys().cloned().collect(),
            state: state.public(),
            last_activity: session.last_update_time,
            session_age_days: session.age_days(now),
            ai_paused: state.ai_paused(),
            is_read: state
                .get(keys::IS_READ)
                .and_then(Value::as_bool)
                .unwrap_or(true),
        }
    }
}
