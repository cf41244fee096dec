//! In-memory durable store: useful for testing restarts without a database.

use crate::history::retained_count;
use async_trait::async_trait;
use chatrelay_core::error::MemoryError;
use chatrelay_core::message::{SessionId, Turn};
use chatrelay_core::store::DurableStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A durable store that keeps rows in process memory.
///
/// Cloning shares the rows, so a test can hand one clone to a relay, drop
/// the relay, and build a fresh one over the same "disk".
#[derive(Clone, Default)]
pub struct InMemoryStore {
    turns: Arc<RwLock<HashMap<SessionId, Vec<Turn>>>>,
    facts: Arc<RwLock<HashMap<SessionId, Vec<(String, String)>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored turns for a session.
    pub async fn turn_count(&self, session: &SessionId) -> usize {
        self.turns.read().await.get(session).map_or(0, Vec::len)
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    fn name(&self) -> &str { "in_memory" }

    async fn append_turn(&self, session: &SessionId, turn: &Turn) -> Result<(), MemoryError> {
        self.turns
            .write()
            .await
            .entry(session.clone())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn fetch_recent(&self, session: &SessionId, limit: usize) -> Result<Vec<Turn>, MemoryError> {
        let turns = self.turns.read().await;
        let rows = turns.get(session).map(Vec::as_slice).unwrap_or_default();
        let start = rows.len().saturating_sub(limit);
        Ok(rows[start..].to_vec())
    }

    async fn trim_session(&self, session: &SessionId, max_rows: usize, char_budget: usize) -> Result<usize, MemoryError> {
        let mut turns = self.turns.write().await;
        let Some(rows) = turns.get_mut(session) else {
            return Ok(0);
        };
        let keep = retained_count(rows.iter().rev().map(Turn::char_len), max_rows, char_budget);
        let removed = rows.len() - keep;
        rows.drain(..removed);
        Ok(removed)
    }

    async fn clear_session(&self, session: &SessionId) -> Result<usize, MemoryError> {
        Ok(self.turns.write().await.remove(session).map_or(0, |rows| rows.len()))
    }

    async fn upsert_fact(&self, session: &SessionId, key: &str, value: &str) -> Result<(), MemoryError> {
        let mut facts = self.facts.write().await;
        let entries = facts.entry(session.clone()).or_default();
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => entries.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    async fn load_facts(&self, session: &SessionId) -> Result<Vec<(String, String)>, MemoryError> {
        Ok(self.facts.read().await.get(session).cloned().unwrap_or_default())
    }

    async fn clear_facts(&self, session: &SessionId) -> Result<usize, MemoryError> {
        Ok(self.facts.write().await.remove(session).map_or(0, |f| f.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_recent_returns_newest_in_order() {
        let store = InMemoryStore::new();
        let sid = SessionId::from("s");
        for i in 0..5 {
            store.append_turn(&sid, &Turn::user(format!("m{i}"))).await.unwrap();
        }
        let recent = store.fetch_recent(&sid, 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["m3", "m4"]);
    }

    #[tokio::test]
    async fn trim_drops_oldest_rows() {
        let store = InMemoryStore::new();
        let sid = SessionId::from("s");
        for text in ["aaaa", "bbbb", "cccc", "dddd"] {
            store.append_turn(&sid, &Turn::user(text)).await.unwrap();
        }
        // Budget fits two rows only
        let removed = store.trim_session(&sid, 10, 9).await.unwrap();
        assert_eq!(removed, 2);
        let left = store.fetch_recent(&sid, 10).await.unwrap();
        assert_eq!(left[0].content, "cccc");
        assert_eq!(left[1].content, "dddd");
    }

    #[tokio::test]
    async fn facts_overwrite_in_place() {
        let store = InMemoryStore::new();
        let sid = SessionId::from("s");
        store.upsert_fact(&sid, "mood", "happy").await.unwrap();
        store.upsert_fact(&sid, "place", "Mars").await.unwrap();
        store.upsert_fact(&sid, "mood", "sad").await.unwrap();
        let facts = store.load_facts(&sid).await.unwrap();
        assert_eq!(
            facts,
            vec![("mood".to_string(), "sad".to_string()), ("place".to_string(), "Mars".to_string())]
        );
        assert_eq!(store.clear_facts(&sid).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn clear_unknown_session_is_zero() {
        let store = InMemoryStore::new();
        assert_eq!(store.clear_session(&SessionId::from("nobody")).await.unwrap(), 0);
    }
}
