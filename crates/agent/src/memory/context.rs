//! Per-turn memory context assembly.
//!
//! Selects which summary to inject for a turn and keeps the result under a
//! token ceiling. An in-session summary always wins over the cross-session
//! one so the same facts are never injected twice.

use crate::memory::token::TokenEstimator;
use mnemo_core::session::SessionState;
use tracing::debug;

/// Header of the in-session summary block.
pub const CONVERSATION_MEMORY_HEADER: &str =
    "[CONVERSATION MEMORY - Summary of earlier messages in this conversation]";

/// Header of the cross-session summary block.
pub const CUSTOMER_HISTORY_HEADER: &str = "[CUSTOMER HISTORY - Summary from previous conversations]";

/// Appended when the context had to be cut to fit the ceiling.
pub const TRUNCATION_MARKER: &str = "\n[...truncated for context length]";

/// Builds the memory string handed to the agent runtime.
#[derive(Debug, Clone, Copy)]
pub struct MemoryContextBuilder {
    estimator: TokenEstimator,
    max_context_tokens: usize,
}

impl MemoryContextBuilder {
    pub fn new(estimator: TokenEstimator, max_context_tokens: usize) -> Self {
        Self {
            estimator,
            max_context_tokens,
        }
    }

    pub fn from_config(config: &mnemo_config::MemoryConfig) -> Self {
        Self::new(
            TokenEstimator::new(config.chars_per_token),
            config.max_context_tokens,
        )
    }

    /// The memory context for `state`, or `""` when there is none.
    pub fn build(&self, state: &SessionState) -> String {
        let mut blocks = Vec::new();

        if let Some(summary) = state.conversation_summary() {
            blocks.push(format!("{CONVERSATION_MEMORY_HEADER}\n{summary}"));
        } else if let Some(summary) = state.user_summary() {
            blocks.push(format!("{CUSTOMER_HISTORY_HEADER}\n{summary}"));
        }

        if blocks.is_empty() {
            return String::new();
        }

        let context = blocks.join("\n\n");
        if self.estimator.estimate(&context) <= self.max_context_tokens {
            return context;
        }

        debug!(
            tokens = self.estimator.estimate(&context),
            ceiling = self.max_context_tokens,
            "Truncating memory context"
        );
        self.truncate(&context)
    }

    /// Cut `context` so that the result, marker included, fits the ceiling.
    ///
    /// A ceiling too small for the marker yields a bare cut; configuration
    /// validation keeps loaded ceilings above [`mnemo_config::MIN_CONTEXT_CHARS`].
    fn truncate(&self, context: &str) -> String {
        let budget = self.estimator.char_budget(self.max_context_tokens);
        let marker_chars = TRUNCATION_MARKER.chars().count();

        if budget < marker_chars {
            return take_chars(context, budget).to_string();
        }

        let mut out = take_chars(context, budget - marker_chars).to_string();
        out.push_str(TRUNCATION_MARKER);
        out
    }
}

impl Default for MemoryContextBuilder {
    fn default() -> Self {
        Self::new(TokenEstimator::default(), 8000)
    }
}

/// The first `n` characters of `s`, cut on a char boundary.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
