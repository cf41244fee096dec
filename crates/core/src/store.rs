//! DurableStore trait: optional row-level persistence behind the session caches.
//!
//! The history and sticky caches are authoritative for the running process;
//! a durable store lets them survive restarts. Persistence is chosen at
//! construction time: either a working store or a no-op one, never runtime
//! path probing.

use async_trait::async_trait;
use crate::error::MemoryError;
use crate::message::{SessionId, Turn};

/// Keyed append/read/delete operations over turns and sticky facts.
///
/// No cross-row transactions are required; read-then-trim-then-write races
/// between two requests of the same session resolve as last-writer-wins.
///
/// Implementations: SQLite, in-memory (for testing), none (no-op).
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// The backend name (e.g. "sqlite", "in_memory", "none").
    fn name(&self) -> &str;

    /// `false` for the no-op store: callers skip warm-up reads.
    fn is_persistent(&self) -> bool {
        true
    }

    /// Append one turn to the session's log.
    async fn append_turn(&self, session: &SessionId, turn: &Turn) -> Result<(), MemoryError>;

    /// The `limit` most recent turns, in chronological order.
    async fn fetch_recent(&self, session: &SessionId, limit: usize) -> Result<Vec<Turn>, MemoryError>;

    /// Keep at most `max_rows` newest turns whose cumulative length fits in
    /// `char_budget`; delete the rest. Returns the number of rows deleted.
    async fn trim_session(
        &self,
        session: &SessionId,
        max_rows: usize,
        char_budget: usize,
    ) -> Result<usize, MemoryError>;

    /// Delete every turn of the session. Returns the number of rows deleted.
    async fn clear_session(&self, session: &SessionId) -> Result<usize, MemoryError>;

    /// Insert or overwrite one sticky fact.
    async fn upsert_fact(&self, session: &SessionId, key: &str, value: &str) -> Result<(), MemoryError>;

    /// All sticky facts of the session, in insertion order.
    async fn load_facts(&self, session: &SessionId) -> Result<Vec<(String, String)>, MemoryError>;

    /// Delete every sticky fact of the session. Returns the number deleted.
    async fn clear_facts(&self, session: &SessionId) -> Result<usize, MemoryError>;
}
