//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Characters
//! are counted as Unicode scalar values, so multi-byte text is not
//! over-charged.

use mnemo_core::session::Event;

/// Characters per token when nothing else is configured.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Converts text into approximate cost units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    chars_per_token: usize,
}

impl TokenEstimator {
    /// A ratio of zero is clamped to one.
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    /// `floor(chars / K)`. Rounds down.
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.chars().count() / self.chars_per_token
    }

    /// Sum the characters of every non-empty text part, then divide once.
    pub fn estimate_events(&self, events: &[Event]) -> usize {
        let chars: usize = events
            .iter()
            .flat_map(|e| e.content.iter())
            .filter_map(|p| p.non_empty_text())
            .map(|t| t.chars().count())
            .sum();
        chars / self.chars_per_token
    }

    /// How many characters fit in `units` tokens.
    pub fn char_budget(&self, units: usize) -> usize {
        units.saturating_mul(self.chars_per_token)
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}
