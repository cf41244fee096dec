//! # chatrelay core
//!
//! Domain types, traits, and error definitions for the chatrelay bridge.
//! This crate has **no I/O**: it defines the session/message model and the
//! collaborator seams that the other crates implement against.
//!
//! ## Collaborators
//!
//! Every external dependency of the chat engine is a trait here:
//! - [`CompletionClient`]: messages + parameters in, reply text out
//! - [`DurableStore`]: optional row-level persistence of turns and sticky facts
//! - [`AuthGate`]: token and session allowlist predicates
//!
//! Implementations live in `chatrelay-providers`, `chatrelay-memory` and
//! `chatrelay-security`, so the engine can be tested with plain fakes.

pub mod auth;
pub mod completion;
pub mod error;
pub mod generation;
pub mod message;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use auth::{AuthGate, OpenGate};
pub use completion::CompletionClient;
pub use error::{CompletionError, Error, MemoryError, Result};
pub use generation::{GenerationParams, ProfileOverrides};
pub use message::{Message, Role, SessionId, Turn, total_chars};
pub use store::DurableStore;
