//! Default agent runtime: one provider call per turn.
//!
//! The request is the system instruction, the memory context (if any) as a
//! second system message, then every event not yet folded into the summary.

use async_trait::async_trait;
use mnemo_core::error::ProviderError;
use mnemo_core::message::Message;
use mnemo_core::provider::{Provider, ProviderRequest};
use mnemo_core::runtime::{AgentRuntime, TurnInput, TurnReply};
use mnemo_core::session::Session;
use std::sync::Arc;
use tracing::debug;

/// Agent name recorded as the author of replies.
pub const DEFAULT_AGENT_NAME: &str = "mnemo_agent";

/// Base system instruction for the default runtime.
pub const DEFAULT_INSTRUCTION: &str = "\
You are a friendly, accurate customer-service assistant. If you are unsure \
about something, say so. For complex issues, offer to escalate to a human.

## MEMORY
You remember the whole current conversation. A [CONVERSATION MEMORY] or \
[CUSTOMER HISTORY] block is your own memory of earlier messages or earlier \
conversations with this customer. Use it naturally and never mention that it \
is a summary. If the customer discussed products, preferences or issues \
before, acknowledge that context.";

/// Answers turns by calling a text-generation provider.
pub struct ProviderRuntime {
    provider: Arc<dyn Provider>,
    model: String,
    agent_name: String,
    instruction: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ProviderRuntime {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            agent_name: DEFAULT_AGENT_NAME.into(),
            instruction: DEFAULT_INSTRUCTION.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    /// Build from the top-level config defaults.
    pub fn from_config(provider: Arc<dyn Provider>, config: &mnemo_config::AppConfig) -> Self {
        Self::new(provider, config.default_model.clone())
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
    }

    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// The provider messages for one turn.
    fn build_messages(&self, session: &Session, memory_context: &str) -> Vec<Message> {
        let mut messages = vec![Message::system(&self.instruction)];
        if !memory_context.is_empty() {
            messages.push(Message::system(memory_context));
        }

        let start = session
            .state
            .summary_event_count()
            .min(session.event_count());
        messages.extend(session.events[start..].iter().filter_map(|event| {
            let text = event.usable_text()?;
            Some(if event.is_from_user() {
                Message::user(text)
            } else {
                Message::assistant(text)
            })
        }));
        messages
    }
}

#[async_trait]
impl AgentRuntime for ProviderRuntime {
    fn name(&self) -> &str {
        &self.agent_name
    }

    async fn reply(&self, input: TurnInput<'_>) -> Result<TurnReply, ProviderError> {
        let messages = self.build_messages(input.session, input.memory_context);
        debug!(
            session_id = %input.session.id.short(),
            messages = messages.len(),
            memory_chars = input.memory_context.len(),
            "Requesting reply"
        );

        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self.provider.complete(request).await?;

        Ok(TurnReply {
            author: self.agent_name.clone(),
            text: response.message.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingProvider, session_with};
    use mnemo_core::message::Role;
    use mnemo_core::session::Event;

    #[test]
    fn messages_skip_summarized_events() {
        let runtime = ProviderRuntime::new(Arc::new(RecordingProvider::new("ok")), "m");
        let session = session_with(40, Some(("earlier", 30)));

        let messages = runtime.build_messages(&session, "[CONVERSATION MEMORY - ...]\nearlier");
        // instruction + memory + 10 raw events
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::System);
        assert!(messages[2].content.contains("message 30"));
    }

    #[test]
    fn messages_without_memory() {
        let runtime = ProviderRuntime::new(Arc::new(RecordingProvider::new("ok")), "m");
        let mut session = Session::new("mnemo", "u1");
        session.events.push(Event::user("hello"));
        session.events.push(Event::paused("bot"));

        let messages = runtime.build_messages(&session, "");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);
    }

    #[tokio::test]
    async fn reply_uses_provider_text_and_agent_name() {
        let provider = Arc::new(RecordingProvider::new("We open at 9am."));
        let runtime = ProviderRuntime::new(provider.clone(), "m").with_agent_name("store_agent");
        let mut session = Session::new("mnemo", "u1");
        session.events.push(Event::user("When do you open?"));

        let reply = runtime
            .reply(TurnInput {
                session: &session,
                message: "When do you open?",
                memory_context: "",
            })
            .await
            .unwrap();
        assert_eq!(reply.author, "store_agent");
        assert_eq!(reply.text, "We open at 9am.");
        assert!(provider.last_prompt().unwrap().contains("When do you open?"));
    }
}
