//! SYNAPSE Session Store
//!
//! Per-session JSON state that drives context-bracket computation on the
//! prompt path: prompt counts, the active agent/workflow/task/squad, and
//! append-only usage history. Documents live one-per-uuid in a sessions
//! directory that is kept out of version control, and every update is an
//! atomic rewrite.

pub mod error;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use error::{Result, SessionError};
pub use session::{
    ActiveAgent, ActiveAgentPatch, Session, SessionContext, SessionContextPatch, SessionHistory,
    SessionPatch, SESSION_SCHEMA_VERSION,
};
pub use store::{CleanOutcome, SessionStore};
