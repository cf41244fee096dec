//! CompletionClient trait: the abstraction over the upstream LLM endpoint.
//!
//! The engine only knows the contract "message list + parameters in, reply
//! text out". Wire protocol, authentication and response shape belong to the
//! implementation.

use async_trait::async_trait;
use crate::error::CompletionError;
use crate::generation::GenerationParams;
use crate::message::Message;

/// The core completion trait.
///
/// Implementations must bound the call with their own timeout and report
/// distinguishable [`CompletionError`] categories.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// A human-readable name for this client (e.g. "openai_compat").
    fn name(&self) -> &str;

    /// Send the assembled messages and return the raw reply text.
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> std::result::Result<String, CompletionError>;

    /// Whether the client has what it needs (endpoint, credentials) to try a call.
    fn is_ready(&self) -> bool {
        true
    }
}
