//! Shared test doubles for the memory lifecycle tests.

use async_trait::async_trait;
use mnemo_core::error::{ProviderError, StoreError};
use mnemo_core::message::Message;
use mnemo_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use mnemo_core::session::{Event, Session, SessionId, SessionState, keys};
use mnemo_core::store::{SessionStore, StateMutation};
use std::sync::Mutex;
use std::time::Duration;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    call_count: Mutex<usize>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| make_text_response(t)).collect())
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        let response = responses[*count].clone();
        *count += 1;
        Ok(response)
    }
}

/// Always answers with the same text and remembers the last request.
pub struct RecordingProvider {
    text: String,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl RecordingProvider {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every message of the last request, joined by newlines.
    pub fn last_prompt(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|r| {
            r.messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "recording_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        Ok(make_text_response(&self.text))
    }
}

/// Every call fails with a network error.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

/// Sleeps before answering.
pub struct SlowProvider {
    delay: Duration,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Provider for SlowProvider {
    fn name(&self) -> &str {
        "slow_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(make_text_response("too late"))
    }
}

/// A store whose every operation fails.
pub struct BrokenStore;

fn broken() -> StoreError {
    StoreError::Storage("database is locked".into())
}

#[async_trait]
impl SessionStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn create_session(
        &self,
        _app_name: &str,
        _user_id: &str,
        _session_id: Option<SessionId>,
        _state: SessionState,
    ) -> Result<Session, StoreError> {
        Err(broken())
    }

    async fn get_session(
        &self,
        _app_name: &str,
        _user_id: &str,
        _session_id: &SessionId,
    ) -> Result<Option<Session>, StoreError> {
        Err(broken())
    }

    async fn list_sessions(
        &self,
        _app_name: &str,
        _user_id: Option<&str>,
    ) -> Result<Vec<Session>, StoreError> {
        Err(broken())
    }

    async fn delete_session(
        &self,
        _app_name: &str,
        _user_id: &str,
        _session_id: &SessionId,
    ) -> Result<(), StoreError> {
        Err(broken())
    }

    async fn append_event(
        &self,
        _app_name: &str,
        _user_id: &str,
        _session_id: &SessionId,
        _event: Event,
    ) -> Result<Session, StoreError> {
        Err(broken())
    }

    async fn update_state(
        &self,
        _app_name: &str,
        _user_id: &str,
        _session_id: &SessionId,
        _mutation: StateMutation,
    ) -> Result<bool, StoreError> {
        Err(broken())
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A session of `n` alternating user/agent events reading `message <i>`,
/// optionally already compacted as `(summary, covered_events)`.
pub fn session_with(n: usize, summary: Option<(&str, usize)>) -> Session {
    let mut session = Session::new("mnemo", "u1");
    for i in 0..n {
        let text = format!("message {i}");
        session.events.push(if i % 2 == 0 {
            Event::user(text)
        } else {
            Event::agent("sales_agent", text)
        });
    }
    if let Some((text, covered)) = summary {
        session.state.set(keys::CONVERSATION_SUMMARY, text);
        session.state.set(keys::SUMMARY_EVENT_COUNT, covered);
    }
    session
}
