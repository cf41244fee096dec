//! Deadline wrapper: bounds any completion client by a fixed timeout.
//!
//! Expiry is reported as [`CompletionError::Timeout`], the same category a
//! transport-level timeout produces, so callers handle both identically.

use async_trait::async_trait;
use chatrelay_core::completion::CompletionClient;
use chatrelay_core::error::CompletionError;
use chatrelay_core::generation::GenerationParams;
use chatrelay_core::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct TimeoutClient {
    inner: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl TimeoutClient {
    pub fn new(inner: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl CompletionClient for TimeoutClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, CompletionError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(messages, params)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    client = %self.inner.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Completion timed out"
                );
                Err(CompletionError::Timeout(format!(
                    "'{}' did not answer within {}s",
                    self.inner.name(),
                    self.timeout.as_secs()
                )))
            }
        }
    }
}
