//! AgentRuntime trait - the boundary to whatever produces reply text.
//!
//! Routing, sub-agent delegation and prompt content live behind this trait.
//! The memory layer only hands it the session snapshot plus the memory
//! context string built for the turn.

use crate::error::ProviderError;
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything the runtime sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnInput<'a> {
    /// Session snapshot, including the just-appended user event.
    pub session: &'a Session,

    /// The new user message.
    pub message: &'a str,

    /// Memory context for this turn (may be empty).
    pub memory_context: &'a str,
}

/// The runtime's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    /// Name of the agent that answered.
    pub author: String,

    pub text: String,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn reply(&self, input: TurnInput<'_>) -> Result<TurnReply, ProviderError>;
}
