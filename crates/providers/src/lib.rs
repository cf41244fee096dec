//! Upstream completion clients for chatrelay.
//!
//! All clients implement the `chatrelay_core::CompletionClient` trait.
//! [`TimeoutClient`] bounds any client by a deadline.

pub mod openai_compat;
pub mod timeout;

pub use openai_compat::OpenAiCompatClient;
pub use timeout::TimeoutClient;
