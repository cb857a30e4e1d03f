//! The conversation memory lifecycle for Mnemo.
//!
//! Every turn follows the same cycle:
//!
//! 1. **Receive** a user message and append it to the session
//! 2. **Remember**: recall cross-session memory on a first turn and build
//!    the memory context from the session's summaries
//! 3. **Reply** through the configured agent runtime
//! 4. **Compact** older events into a summary once enough have piled up
//!
//! Storage reclamation for aged-out sessions lives in `mnemo-workflow`.

pub mod memory;
pub mod runtime;
pub mod turn;

#[cfg(test)]
mod test_helpers;

pub use memory::{
    CrossSessionRecall, MemoryContextBuilder, SessionMemoryInfo, Summarizer, SummaryPolicy,
    SummaryUpdate, TRUNCATION_MARKER, TokenEstimator, to_transcript,
};
pub use runtime::ProviderRuntime;
pub use turn::{TurnOutcome, TurnProcessor};
