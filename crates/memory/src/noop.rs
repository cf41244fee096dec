//! No-op durable store: persistence disabled.

use async_trait::async_trait;
use chatrelay_core::error::MemoryError;
use chatrelay_core::message::{SessionId, Turn};
use chatrelay_core::store::DurableStore;

/// A durable store that stores nothing.
///
/// Chosen at construction time when persistence is off, so the caches never
/// have to check a flag.
pub struct NoopStore;

#[async_trait]
impl DurableStore for NoopStore {
    fn name(&self) -> &str { "none" }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn append_turn(&self, _session: &SessionId, _turn: &Turn) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn fetch_recent(&self, _session: &SessionId, _limit: usize) -> Result<Vec<Turn>, MemoryError> {
        Ok(Vec::new())
    }

    async fn trim_session(&self, _session: &SessionId, _max_rows: usize, _char_budget: usize) -> Result<usize, MemoryError> {
        Ok(0)
    }

    async fn clear_session(&self, _session: &SessionId) -> Result<usize, MemoryError> {
        Ok(0)
    }

    async fn upsert_fact(&self, _session: &SessionId, _key: &str, _value: &str) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn load_facts(&self, _session: &SessionId) -> Result<Vec<(String, String)>, MemoryError> {
        Ok(Vec::new())
    }

    async fn clear_facts(&self, _session: &SessionId) -> Result<usize, MemoryError> {
        Ok(0)
    }
}
