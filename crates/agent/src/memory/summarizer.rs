//! Summarization engine - folds older events into a durable summary.
//!
//! Compaction is event-count driven. Once a session has accumulated
//! `threshold` events that are not yet covered by its summary, everything
//! except the newest `keep_recent` events is re-summarized together with the
//! previous summary. The result is returned as a [`SummaryUpdate`] that the
//! caller applies through the store's atomic state update.

use crate::memory::token::TokenEstimator;
use crate::memory::transcript::to_transcript;
use chrono::{DateTime, Utc};
use mnemo_core::error::ProviderError;
use mnemo_core::provider::Provider;
use mnemo_core::session::{Event, Session, SessionState, keys};
use mnemo_core::store::StateMutation;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default bound on one summarization call.
pub const DEFAULT_SUMMARIZATION_TIMEOUT: Duration = Duration::from_secs(30);

const SUMMARIZATION_PROMPT: &str = "\
You maintain the long-term memory of a retail customer-service assistant.

Summarize the conversation excerpt below. Keep every one of these details that appears:
- Customer identity and contact details (name, email, phone) and stated preferences
- Products discussed, with names, prices, colors, materials and other attributes
- Decisions taken or items the customer selected
- Delivery, shipping or appointment details and dates
- Open issues, complaints and any tickets that were created
- Commitments or promises the agent made
- Budget, style preferences and room dimensions

Be concise but complete: this summary becomes the only record of this part of the conversation.
Output the summary itself with no preamble.";

/// When compaction fires and how much it leaves raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPolicy {
    /// Minimum total and unsummarized event count before compacting.
    pub threshold: usize,
    /// Newest events never folded into the summary.
    pub keep_recent: usize,
}

impl Default for SummaryPolicy {
    fn default() -> Self {
        Self {
            threshold: 40,
            keep_recent: 10,
        }
    }
}

impl SummaryPolicy {
    /// The new summary boundary, or `None` if no compaction is due.
    ///
    /// Both the total and the unsummarized count must reach the threshold,
    /// and the boundary must move forward.
    pub fn cutoff(&self, total: usize, already: usize) -> Option<usize> {
        if total < self.threshold {
            return None;
        }
        let unsummarized = total.saturating_sub(already);
        if unsummarized < self.threshold {
            return None;
        }
        let cutoff = total.saturating_sub(self.keep_recent);
        if cutoff <= already {
            debug!(total, already, cutoff, "Compaction boundary would not advance, skipping");
            return None;
        }
        Some(cutoff)
    }
}

/// The state changes produced by one compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryUpdate {
    pub conversation_summary: String,
    pub summary_event_count: usize,
    pub user_summary: String,
    pub last_summarized_at: DateTime<Utc>,
    /// `summary_event_count` of the snapshot this update was computed from.
    pub based_on: usize,
}

impl SummaryUpdate {
    /// Merge into `state`, refusing stale or regressing updates.
    pub fn apply(&self, state: &mut SessionState) -> bool {
        let stored = state.summary_event_count();
        if stored != self.based_on {
            warn!(
                stored,
                based_on = self.based_on,
                "Discarding summary computed from a stale snapshot"
            );
            return false;
        }
        if self.summary_event_count < stored {
            warn!(
                stored,
                new = self.summary_event_count,
                "Discarding summary that would move the boundary backwards"
            );
            return false;
        }

        state.set(keys::CONVERSATION_SUMMARY, self.conversation_summary.clone());
        state.set(keys::SUMMARY_EVENT_COUNT, self.summary_event_count);
        state.set(keys::USER_SUMMARY, self.user_summary.clone());
        state.set(keys::LAST_SUMMARIZED_AT, self.last_summarized_at.to_rfc3339());
        true
    }

    /// Wrap as a store mutation.
    pub fn into_mutation(self) -> StateMutation {
        Box::new(move |state| self.apply(state))
    }
}

/// Calls the text-generation provider to produce summaries.
pub struct Summarizer {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
    policy: SummaryPolicy,
    estimator: TokenEstimator,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: DEFAULT_SUMMARIZATION_TIMEOUT,
            policy: SummaryPolicy::default(),
            estimator: TokenEstimator::default(),
        }
    }

    /// Build from the `[memory]` config section.
    pub fn from_config(provider: Arc<dyn Provider>, config: &mnemo_config::MemoryConfig) -> Self {
        Self::new(provider, config.summarization_model.clone())
            .with_timeout(Duration::from_secs(config.summarization_timeout_secs))
            .with_policy(SummaryPolicy {
                threshold: config.summarization_threshold,
                keep_recent: config.keep_recent_events,
            })
            .with_estimator(TokenEstimator::new(config.chars_per_token))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: SummaryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn policy(&self) -> SummaryPolicy {
        self.policy
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the summarization prompt for a transcript.
    pub fn build_prompt(transcript: &str, previous: Option<&str>) -> String {
        let mut prompt = format!("{SUMMARIZATION_PROMPT}\n\nCONVERSATION:\n{transcript}\n");
        if let Some(previous) = previous.filter(|p| !p.is_empty()) {
            prompt.push_str(
                "\nPREVIOUS SUMMARY (merge it with the conversation above; keep every fact \
                 that is still true and update what changed):\n",
            );
            prompt.push_str(previous);
            prompt.push('\n');
        }
        prompt
    }

    /// Summarize `events`, folding in `previous`.
    ///
    /// Never fails: on provider error or timeout the previous summary (or
    /// `""`) comes back unchanged.
    pub async fn summarize(&self, events: &[Event], previous: Option<&str>) -> String {
        if events.is_empty() {
            return String::new();
        }
        let fallback = previous.unwrap_or_default().to_string();
        match self.try_summarize(events, previous).await {
            Ok(Some(summary)) => summary,
            Ok(None) => fallback,
            Err(e) => {
                error!(error = %e, events = events.len(), "Summarization failed");
                fallback
            }
        }
    }

    /// `Ok(None)` when there is nothing to summarize.
    async fn try_summarize(
        &self,
        events: &[Event],
        previous: Option<&str>,
    ) -> Result<Option<String>, ProviderError> {
        let transcript = to_transcript(events);
        if transcript.trim().is_empty() {
            return Ok(None);
        }

        let prompt = Self::build_prompt(&transcript, previous);
        let summary =
            match tokio::time::timeout(self.timeout, self.provider.generate(&self.model, &prompt))
                .await
            {
                Ok(result) => result?.trim().to_string(),
                Err(_) => {
                    return Err(ProviderError::Timeout(format!(
                        "summarization exceeded {}s",
                        self.timeout.as_secs()
                    )));
                }
            };

        info!(
            events = events.len(),
            chars = summary.chars().count(),
            tokens = self.estimator.estimate(&summary),
            "Summarized events"
        );
        Ok(Some(summary))
    }

    /// Compact `session` if the policy says it is due.
    ///
    /// Returns `None` when compaction is not due or produced nothing. A
    /// prefix with no text advances the boundary with the previous summary
    /// unchanged, if there is one. A
    /// failed provider call leaves the backlog for the next turn instead of
    /// advancing the boundary past events the summary does not cover.
    pub async fn maybe_summarize(&self, session: &Session) -> Option<SummaryUpdate> {
        let total = session.event_count();
        let already = session.state.summary_event_count();
        let cutoff = self.policy.cutoff(total, already)?;

        info!(
            session_id = %session.id.short(),
            total,
            already,
            new = total - already,
            cutoff,
            "Summarization triggered"
        );

        let previous = session.state.conversation_summary();
        let summary = match self.try_summarize(&session.events[..cutoff], previous).await {
            Ok(Some(summary)) if !summary.is_empty() => summary,
            // No text in the prefix: the previous summary still covers it.
            Ok(None) if previous.is_some_and(|p| !p.is_empty()) => {
                debug!(
                    session_id = %session.id.short(),
                    cutoff,
                    "No text to summarize, carrying previous summary forward"
                );
                previous.unwrap_or_default().to_string()
            }
            Ok(_) => {
                debug!(session_id = %session.id.short(), "Nothing to summarize");
                return None;
            }
            Err(e) => {
                warn!(
                    session_id = %session.id.short(),
                    error = %e,
                    "Summarization failed, will retry on a later turn"
                );
                return None;
            }
        };

        Some(SummaryUpdate {
            conversation_summary: summary.clone(),
            summary_event_count: cutoff,
            user_summary: summary,
            last_summarized_at: Utc::now(),
            based_on: already,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        FailingProvider, RecordingProvider, SequentialMockProvider, SlowProvider, session_with,
    };

    fn summarizer(provider: Arc<dyn Provider>) -> Summarizer {
        Summarizer::new(provider, "summary-model")
    }

    #[test]
    fn policy_threshold_scenario() {
        let policy = SummaryPolicy::default();
        assert_eq!(policy.cutoff(40, 0), Some(30));
        // 40 - 30 = 10 unsummarized, below threshold
        assert_eq!(policy.cutoff(40, 30), None);
        assert_eq!(policy.cutoff(39, 0), None);
        // needs another full threshold of new events
        assert_eq!(policy.cutoff(69, 30), None);
        assert_eq!(policy.cutoff(70, 30), Some(60));
    }

    #[test]
    fn policy_skips_non_advancing_cutoff() {
        let policy = SummaryPolicy {
            threshold: 5,
            keep_recent: 10,
        };
        // cutoff saturates to 0, which never advances
        assert_eq!(policy.cutoff(8, 0), None);
        // compaction is delayed until keep_recent + 1 events
        assert_eq!(policy.cutoff(10, 0), None);
        assert_eq!(policy.cutoff(11, 0), Some(1));
    }

    #[test]
    fn prompt_includes_previous_summary_section() {
        let prompt = Summarizer::build_prompt("Customer: hi", Some("Likes oak"));
        assert!(prompt.contains("CONVERSATION:\nCustomer: hi"));
        assert!(prompt.contains("PREVIOUS SUMMARY"));
        assert!(prompt.ends_with("Likes oak\n"));

        let prompt = Summarizer::build_prompt("Customer: hi", None);
        assert!(!prompt.contains("PREVIOUS SUMMARY"));
        let prompt = Summarizer::build_prompt("Customer: hi", Some(""));
        assert!(!prompt.contains("PREVIOUS SUMMARY"));
    }

    #[tokio::test]
    async fn summarize_empty_events_is_empty() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let s = summarizer(provider.clone());
        assert_eq!(s.summarize(&[], Some("old")).await, "");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn summarize_sentinel_only_returns_previous() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let s = summarizer(provider.clone());
        let events = vec![Event::paused("bot")];
        assert_eq!(s.summarize(&events, Some("old")).await, "old");
        assert_eq!(s.summarize(&events, None).await, "");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn summarize_trims_model_output() {
        let provider = Arc::new(SequentialMockProvider::texts(&["  Wants a sofa.\n"]));
        let s = summarizer(provider);
        let out = s.summarize(&[Event::user("I want a sofa")], None).await;
        assert_eq!(out, "Wants a sofa.");
    }

    #[tokio::test]
    async fn failed_call_returns_previous_summary() {
        let s = summarizer(Arc::new(FailingProvider));
        let events = vec![Event::user("hello")];
        assert_eq!(s.summarize(&events, Some("keep me")).await, "keep me");
        assert_eq!(s.summarize(&events, None).await, "");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_call_returns_previous_summary() {
        let s = summarizer(Arc::new(SlowProvider::new(Duration::from_secs(300))))
            .with_timeout(Duration::from_secs(5));
        let events = vec![Event::user("hello")];
        assert_eq!(s.summarize(&events, Some("keep me")).await, "keep me");
    }

    #[tokio::test]
    async fn threshold_scenario_produces_cutoff_30() {
        let provider = Arc::new(RecordingProvider::new("Summary of 30 events"));
        let s = summarizer(provider.clone());
        let session = session_with(40, None);

        let update = s.maybe_summarize(&session).await.unwrap();
        assert_eq!(update.summary_event_count, 30);
        assert_eq!(update.based_on, 0);
        assert_eq!(update.conversation_summary, "Summary of 30 events");
        assert_eq!(update.user_summary, update.conversation_summary);

        // Only the first 30 events went into the prompt.
        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains("message 29"));
        assert!(!prompt.contains("message 30"));
    }

    #[tokio::test]
    async fn no_retrigger_after_compaction() {
        let provider = Arc::new(RecordingProvider::new("S1"));
        let s = summarizer(provider.clone());
        let mut session = session_with(40, None);

        let update = s.maybe_summarize(&session).await.unwrap();
        assert!(update.apply(&mut session.state));

        assert!(s.maybe_summarize(&session).await.is_none());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn second_compaction_folds_previous_summary() {
        let provider = Arc::new(RecordingProvider::new("S2"));
        let s = summarizer(provider.clone());
        let mut session = session_with(70, Some(("S1", 30)));

        let update = s.maybe_summarize(&session).await.unwrap();
        assert_eq!(update.summary_event_count, 60);
        assert!(provider.last_prompt().unwrap().contains("S1"));

        assert!(update.apply(&mut session.state));
        assert_eq!(session.state.summary_event_count(), 60);
        assert!(session.state.summary_event_count() <= session.event_count());
    }

    #[tokio::test]
    async fn textless_prefix_advances_boundary_with_previous_summary() {
        let provider = Arc::new(RecordingProvider::new("unused"));
        let s = summarizer(provider.clone());
        let mut session = Session::new("mnemo", "u1");
        for _ in 0..70 {
            session.events.push(Event::paused("sales_agent"));
        }
        session.state.set(keys::CONVERSATION_SUMMARY, "S1");
        session.state.set(keys::SUMMARY_EVENT_COUNT, 30);

        let update = s.maybe_summarize(&session).await.unwrap();
        assert_eq!(update.summary_event_count, 60);
        assert_eq!(update.conversation_summary, "S1");
        assert_eq!(update.user_summary, "S1");
        assert_eq!(update.based_on, 30);
        assert_eq!(provider.calls(), 0);

        assert!(update.apply(&mut session.state));
        assert!(s.maybe_summarize(&session).await.is_none());
    }

    #[tokio::test]
    async fn textless_prefix_without_summary_yields_no_update() {
        let s = summarizer(Arc::new(RecordingProvider::new("unused")));
        let mut session = Session::new("mnemo", "u1");
        for _ in 0..40 {
            session.events.push(Event::paused("sales_agent"));
        }
        assert!(s.maybe_summarize(&session).await.is_none());
    }

    #[tokio::test]
    async fn failed_call_does_not_advance_boundary() {
        let s = summarizer(Arc::new(FailingProvider));
        let session = session_with(40, None);
        assert!(s.maybe_summarize(&session).await.is_none());
    }

    #[tokio::test]
    async fn empty_model_output_yields_no_update() {
        let s = summarizer(Arc::new(SequentialMockProvider::texts(&["   "])));
        let session = session_with(40, None);
        assert!(s.maybe_summarize(&session).await.is_none());
    }

    #[test]
    fn stale_update_is_rejected() {
        let update = SummaryUpdate {
            conversation_summary: "new".into(),
            summary_event_count: 30,
            user_summary: "new".into(),
            last_summarized_at: Utc::now(),
            based_on: 0,
        };
        let mut state = SessionState::new();
        state.set(keys::SUMMARY_EVENT_COUNT, 60);
        state.set(keys::CONVERSATION_SUMMARY, "newer");

        assert!(!update.apply(&mut state));
        assert_eq!(state.summary_event_count(), 60);
        assert_eq!(state.conversation_summary(), Some("newer"));
    }

    #[test]
    fn apply_writes_all_keys() {
        let update = SummaryUpdate {
            conversation_summary: "sum".into(),
            summary_event_count: 30,
            user_summary: "sum".into(),
            last_summarized_at: Utc::now(),
            based_on: 0,
        };
        let mut state = SessionState::new();
        assert!(update.into_mutation()(&mut state));
        assert_eq!(state.conversation_summary(), Some("sum"));
        assert_eq!(state.user_summary(), Some("sum"));
        assert_eq!(state.summary_event_count(), 30);
        assert!(state.last_summarized_at().is_some());
    }

    #[test]
    fn from_config_uses_memory_section() {
        let mut config = mnemo_config::MemoryConfig::default();
        config.summarization_threshold = 20;
        config.keep_recent_events = 4;
        config.summarization_model = "cheap-model".into();
        let s = Summarizer::from_config(Arc::new(FailingProvider), &config);
        assert_eq!(
            s.policy(),
            SummaryPolicy {
                threshold: 20,
                keep_recent: 4
            }
        );
        assert_eq!(s.model(), "cheap-model");
    }
}
