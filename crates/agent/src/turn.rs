//! The per-turn pipeline.
//!
//! 1. **Append** the user message to the session (created on first use)
//! 2. **Short-circuit** with the sentinel reply if a human has taken over
//! 3. **Recall** cross-session memory on the session's first turn
//! 4. **Build** the memory context and run the agent runtime
//! 5. **Append** the reply, then **compact** if due
//! 6. **Persist** bookkeeping and any summary in one atomic state update
//!
//! Turns on the same session are serialized; different sessions run freely.

use crate::memory::{CrossSessionRecall, MemoryContextBuilder, Summarizer, SummaryUpdate};
use mnemo_core::error::{Error, StoreError};
use mnemo_core::runtime::{AgentRuntime, TurnInput};
use mnemo_core::session::{AI_PAUSED_SENTINEL, Event, Session, SessionId, SessionState, keys};
use mnemo_core::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Characters of the newest user message kept as a preview.
pub const PREVIEW_CHARS: usize = 100;

/// The result of one processed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session_id: SessionId,
    pub author: String,
    pub reply: String,
    /// A human operator owns this conversation; `reply` is the sentinel.
    pub paused: bool,
    /// This turn compacted older events into the summary.
    pub summarized: bool,
    pub event_count: usize,
}

type LockKey = (String, String);

/// Drives one turn through the memory lifecycle.
pub struct TurnProcessor {
    store: Arc<dyn SessionStore>,
    runtime: Arc<dyn AgentRuntime>,
    summarizer: Arc<Summarizer>,
    context: MemoryContextBuilder,
    recall: CrossSessionRecall,
    app_name: String,
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl TurnProcessor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        runtime: Arc<dyn AgentRuntime>,
        summarizer: Arc<Summarizer>,
        context: MemoryContextBuilder,
        app_name: impl Into<String>,
    ) -> Self {
        let app_name = app_name.into();
        Self {
            recall: CrossSessionRecall::new(store.clone(), app_name.clone()),
            store,
            runtime,
            summarizer,
            context,
            app_name,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Process one user message.
    ///
    /// With `session_id = None` a fresh session is started. Only failures to
    /// load or append to the session, or of the runtime itself, are errors;
    /// memory maintenance degrades silently.
    pub async fn process(
        &self,
        user_id: &str,
        session_id: Option<SessionId>,
        message: &str,
    ) -> Result<TurnOutcome, Error> {
        let session_id = session_id.unwrap_or_default();
        let lock = self.session_lock(user_id, &session_id).await;
        let _guard = lock.lock().await;

        self.ensure_session(user_id, &session_id).await?;
        let mut session = self
            .store
            .append_event(&self.app_name, user_id, &session_id, Event::user(message))
            .await?;

        info!(
            session_id = %session_id.short(),
            user_id,
            events = session.event_count(),
            "Processing turn"
        );

        if session.state.ai_paused() {
            return self.paused_turn(user_id, &session_id).await;
        }

        if session.event_count() <= 1 && session.state.user_summary().is_none() {
            self.recall_into(&mut session).await;
        }

        let memory_context = self.context.build(&session.state);
        if !memory_context.is_empty() {
            debug!(
                session_id = %session_id.short(),
                chars = memory_context.len(),
                "Memory context injected"
            );
        }

        let reply = self
            .runtime
            .reply(TurnInput {
                session: &session,
                message,
                memory_context: &memory_context,
            })
            .await?;

        let session = self
            .store
            .append_event(
                &self.app_name,
                user_id,
                &session_id,
                Event::agent(&reply.author, &reply.text),
            )
            .await?;

        let update = self.summarizer.maybe_summarize(&session).await;
        let summarized = self.persist_turn_state(&session, update).await;
        if summarized {
            info!(session_id = %session_id.short(), "Conversation summarized");
        }

        Ok(TurnOutcome {
            session_id,
            author: reply.author,
            reply: reply.text,
            paused: false,
            summarized,
            event_count: session.event_count(),
        })
    }

    /// Set or clear the human-takeover flag.
    pub async fn set_paused(
        &self,
        user_id: &str,
        session_id: &SessionId,
        paused: bool,
    ) -> Result<(), StoreError> {
        self.store
            .update_state(
                &self.app_name,
                user_id,
                session_id,
                Box::new(move |state| {
                    if state.ai_paused() == paused {
                        return false;
                    }
                    state.set(keys::AI_PAUSED, paused);
                    true
                }),
            )
            .await
            .map(|_| ())
    }

    async fn session_lock(&self, user_id: &str, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Entries only the map still references are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((user_id.to_string(), session_id.0.clone()))
            .or_default()
            .clone()
    }

    async fn ensure_session(&self, user_id: &str, session_id: &SessionId) -> Result<(), Error> {
        let existing = self
            .store
            .get_session(&self.app_name, user_id, session_id)
            .await?;
        if existing.is_none() {
            self.store
                .create_session(
                    &self.app_name,
                    user_id,
                    Some(session_id.clone()),
                    SessionState::new(),
                )
                .await?;
            debug!(session_id = %session_id.short(), user_id, "Started session");
        }
        Ok(())
    }

    async fn paused_turn(&self, user_id: &str, session_id: &SessionId) -> Result<TurnOutcome, Error> {
        info!(session_id = %session_id.short(), "AI paused, human agent handling this conversation");
        let author = self.runtime.name().to_string();
        let session = self
            .store
            .append_event(&self.app_name, user_id, session_id, Event::paused(&author))
            .await?;
        self.persist_turn_state(&session, None).await;

        Ok(TurnOutcome {
            session_id: session_id.clone(),
            author,
            reply: AI_PAUSED_SENTINEL.to_string(),
            paused: true,
            summarized: false,
            event_count: session.event_count(),
        })
    }

    /// Load the newest summary from the user's other sessions into state.
    async fn recall_into(&self, session: &mut Session) {
        let summary = self.recall.load(&session.user_id, Some(&session.id)).await;
        if summary.is_empty() {
            return;
        }

        let carried = summary.clone();
        let result = self
            .store
            .update_state(
                &self.app_name,
                &session.user_id,
                &session.id,
                Box::new(move |state| {
                    if state.user_summary().is_some() {
                        return false;
                    }
                    state.set(keys::USER_SUMMARY, carried);
                    true
                }),
            )
            .await;

        match result {
            Ok(_) => {
                info!(
                    user_id = %session.user_id,
                    chars = summary.chars().count(),
                    "Loaded cross-session memory"
                );
                session.state.set(keys::USER_SUMMARY, summary);
            }
            Err(e) => warn!(error = %e, "Failed to store cross-session memory"),
        }
    }

    /// Write bookkeeping plus any summary; returns whether the summary landed.
    async fn persist_turn_state(&self, session: &Session, update: Option<SummaryUpdate>) -> bool {
        let message_count = session.event_count();
        let preview = session
            .last_user_text()
            .map(|text| text.chars().take(PREVIEW_CHARS).collect::<String>());
        let applied = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let applied_flag = applied.clone();

        let result = self
            .store
            .update_state(
                &self.app_name,
                &session.user_id,
                &session.id,
                Box::new(move |state| {
                    state.set(keys::MESSAGE_COUNT, message_count);
                    if let Some(preview) = preview {
                        state.set(keys::LAST_MESSAGE_PREVIEW, preview);
                    }
                    if let Some(update) = update
                        && update.apply(state)
                    {
                        applied_flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                    true
                }),
            )
            .await;

        match result {
            Ok(_) => applied.load(std::sync::atomic::Ordering::SeqCst),
            Err(e) => {
                warn!(session_id = %session.id.short(), error = %e, "Failed to persist turn state");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{SummaryPolicy, TokenEstimator};
    use crate::runtime::ProviderRuntime;
    use crate::test_helpers::{FailingProvider, RecordingProvider};
    use chrono::{Duration, Utc};
    use mnemo_core::provider::Provider;
    use mnemo_memory::InMemorySessionStore;

    const APP: &str = "mnemo";

    struct Harness {
        store: Arc<InMemorySessionStore>,
        provider: Arc<RecordingProvider>,
        processor: TurnProcessor,
    }

    fn harness(policy: SummaryPolicy, summarizer_provider: Option<Arc<dyn Provider>>) -> Harness {
        let store = Arc::new(InMemorySessionStore::new());
        let provider = Arc::new(RecordingProvider::new("Sure, happy to help."));
        let summarizer_provider = summarizer_provider.unwrap_or_else(|| provider.clone());
        let summarizer =
            Arc::new(Summarizer::new(summarizer_provider, "summary-model").with_policy(policy));
        let runtime = Arc::new(ProviderRuntime::new(provider.clone(), "chat-model"));
        let processor = TurnProcessor::new(
            store.clone(),
            runtime,
            summarizer,
            MemoryContextBuilder::new(TokenEstimator::default(), 8000),
            APP,
        );
        Harness {
            store,
            provider,
            processor,
        }
    }

    #[tokio::test]
    async fn first_turn_creates_session_and_bookkeeping() {
        let h = harness(SummaryPolicy::default(), None);
        let outcome = h.processor.process("u1", None, "Hello there").await.unwrap();

        assert_eq!(outcome.reply, "Sure, happy to help.");
        assert_eq!(outcome.author, "mnemo_agent");
        assert_eq!(outcome.event_count, 2);
        assert!(!outcome.paused);

        let session = h
            .store
            .get_session(APP, "u1", &outcome.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state.get(keys::MESSAGE_COUNT).and_then(|v| v.as_u64()), Some(2));
        assert_eq!(
            session.state.get_str(keys::LAST_MESSAGE_PREVIEW),
            Some("Hello there")
        );
    }

    #[tokio::test]
    async fn preview_is_capped() {
        let h = harness(SummaryPolicy::default(), None);
        let long = "é".repeat(150);
        let outcome = h.processor.process("u1", None, &long).await.unwrap();
        let session = h
            .store
            .get_session(APP, "u1", &outcome.session_id)
            .await
            .unwrap()
            .unwrap();
        let preview = session.state.get_str(keys::LAST_MESSAGE_PREVIEW).unwrap();
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn compaction_fires_at_threshold() {
        let policy = SummaryPolicy {
            threshold: 6,
            keep_recent: 2,
        };
        let h = harness(policy, None);
        let sid = SessionId::from("s1");

        for i in 0..2 {
            let outcome = h
                .processor
                .process("u1", Some(sid.clone()), &format!("turn {i}"))
                .await
                .unwrap();
            assert!(!outcome.summarized);
        }
        let outcome = h
            .processor
            .process("u1", Some(sid.clone()), "turn 2")
            .await
            .unwrap();
        assert!(outcome.summarized);
        assert_eq!(outcome.event_count, 6);

        let session = h.store.get_session(APP, "u1", &sid).await.unwrap().unwrap();
        assert_eq!(session.state.summary_event_count(), 4);
        assert_eq!(
            session.state.conversation_summary(),
            Some("Sure, happy to help.")
        );
        assert_eq!(session.state.user_summary(), Some("Sure, happy to help."));

        // Next turn injects the in-session summary.
        h.processor
            .process("u1", Some(sid.clone()), "turn 3")
            .await
            .unwrap();
        assert!(h.provider.last_prompt().unwrap().contains("[CONVERSATION MEMORY"));
    }

    #[tokio::test]
    async fn summarizer_failure_does_not_fail_turn() {
        let policy = SummaryPolicy {
            threshold: 2,
            keep_recent: 0,
        };
        let h = harness(policy, Some(Arc::new(FailingProvider)));
        let outcome = h.processor.process("u1", None, "hi").await.unwrap();
        assert!(!outcome.summarized);

        let session = h
            .store
            .get_session(APP, "u1", &outcome.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state.summary_event_count(), 0);
    }

    #[tokio::test]
    async fn new_session_recalls_previous_summary() {
        let h = harness(SummaryPolicy::default(), None);
        let mut old = Session::new(APP, "u1");
        old.state
            .set(keys::CONVERSATION_SUMMARY, "Customer Dana wants a navy sectional");
        old.last_update_time = Utc::now() - Duration::days(3);
        h.store.import_session(old).await;

        let outcome = h.processor.process("u1", None, "Hi again").await.unwrap();
        let prompt = h.provider.last_prompt().unwrap();
        assert!(prompt.contains("[CUSTOMER HISTORY"));
        assert!(prompt.contains("navy sectional"));

        let session = h
            .store
            .get_session(APP, "u1", &outcome.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            session.state.user_summary(),
            Some("Customer Dana wants a navy sectional")
        );
    }

    #[tokio::test]
    async fn paused_session_returns_sentinel_without_runtime_call() {
        let h = harness(SummaryPolicy::default(), None);
        let sid = SessionId::from("s1");
        h.processor
            .process("u1", Some(sid.clone()), "hello")
            .await
            .unwrap();
        let calls_before = h.provider.calls();

        h.processor.set_paused("u1", &sid, true).await.unwrap();
        let outcome = h
            .processor
            .process("u1", Some(sid.clone()), "are you there?")
            .await
            .unwrap();

        assert!(outcome.paused);
        assert_eq!(outcome.reply, AI_PAUSED_SENTINEL);
        assert_eq!(h.provider.calls(), calls_before);

        let session = h.store.get_session(APP, "u1", &sid).await.unwrap().unwrap();
        assert_eq!(session.event_count(), 4);
        assert_eq!(
            session.state.get_str(keys::LAST_MESSAGE_PREVIEW),
            Some("are you there?")
        );

        h.processor.set_paused("u1", &sid, false).await.unwrap();
        let outcome = h
            .processor
            .process("u1", Some(sid), "back?")
            .await
            .unwrap();
        assert!(!outcome.paused);
    }

    #[tokio::test]
    async fn runtime_failure_surfaces() {
        let store = Arc::new(InMemorySessionStore::new());
        let processor = TurnProcessor::new(
            store,
            Arc::new(ProviderRuntime::new(Arc::new(FailingProvider), "m")),
            Arc::new(Summarizer::new(Arc::new(FailingProvider), "m")),
            MemoryContextBuilder::default(),
            APP,
        );
        let err = processor.process("u1", None, "hi").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_are_serialized() {
        let h = Arc::new(harness(SummaryPolicy::default(), None));
        let sid = SessionId::from("shared");

        let mut handles = Vec::new();
        for i in 0..8 {
            let h = h.clone();
            let sid = sid.clone();
            handles.push(tokio::spawn(async move {
                h.processor
                    .process("u1", Some(sid), &format!("msg {i}"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let session = h.store.get_session(APP, "u1", &sid).await.unwrap().unwrap();
        assert_eq!(session.event_count(), 16);
        // user and reply events alternate
        for pair in session.events.chunks(2) {
            assert!(pair[0].is_from_user());
            assert!(!pair[1].is_from_user());
        }
        assert_eq!(session.state.get(keys::MESSAGE_COUNT).and_then(|v| v.as_u64()), Some(16));
    }
}
