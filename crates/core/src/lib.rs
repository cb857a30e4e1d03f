//! # Mnemo Core
//!
//! Domain types, traits, and error definitions for the Mnemo conversation
//! memory service. This crate has **zero framework dependencies** - it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (session store, text-generation provider,
//! agent runtime) is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod runtime;
pub mod session;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use runtime::{AgentRuntime, TurnInput, TurnReply};
pub use session::{Event, Part, Session, SessionId, SessionState};
pub use store::{SessionStore, StateMutation};
