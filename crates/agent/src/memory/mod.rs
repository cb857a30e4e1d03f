//! Conversation memory lifecycle.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`token`] | Character-ratio cost estimate |
//! | [`transcript`] | Events → `Customer:` / `Agent (name):` lines |
//! | [`summarizer`] | Threshold-driven compaction via the provider |
//! | [`context`] | Per-turn memory string under a token ceiling |
//! | [`recall`] | Newest summary from the user's other sessions |
//! | [`inspect`] | Read-only debug projection |

pub mod context;
pub mod inspect;
pub mod recall;
pub mod summarizer;
pub mod token;
pub mod transcript;

pub use context::{MemoryContextBuilder, TRUNCATION_MARKER};
pub use inspect::SessionMemoryInfo;
pub use recall::CrossSessionRecall;
pub use summarizer::{SummaryPolicy, SummaryUpdate, Summarizer};
pub use token::{TokenEstimator};
pub use transcript::to_transcript;
