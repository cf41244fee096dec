//! Rolling per-session conversation history.
//!
//! The in-process cache is authoritative while the process runs; a
//! [`DurableStore`] (possibly the no-op one) receives every append and lets
//! a fresh process warm its cache on the first read of a session.

use chatrelay_core::message::{Role, SessionId, Turn};
use chatrelay_core::store::DurableStore;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How many of the newest rows fit both limits.
///
/// `lengths` must be ordered newest first. Counting stops at the first row
/// that would push the total over `char_budget`, so the retained rows are
/// always a contiguous newest suffix of the log.
pub fn retained_count(lengths: impl Iterator<Item = usize>, max_rows: usize, char_budget: usize) -> usize {
    let mut total = 0usize;
    let mut kept = 0usize;
    for len in lengths.take(max_rows) {
        total += len;
        if total > char_budget {
            break;
        }
        kept += 1;
    }
    kept
}

/// Cache capacity for a turn-count setting: 2N turns, never less than one pair.
fn capacity_for(turns: usize) -> usize {
    turns.max(1).saturating_mul(2)
}

#[derive(Default)]
struct SessionLog {
    turns: VecDeque<Turn>,
    /// Largest row limit the durable store has been read with
    fetched: Option<usize>,
    /// A turn failed to reach the durable store, so the cache is ahead of it
    diverged: bool,
}

impl SessionLog {
    fn shrink_to(&mut self, capacity: usize) {
        while self.turns.len() > capacity {
            self.turns.pop_front();
        }
    }
}

/// Per-session rolling history with optional write-through persistence.
pub struct HistoryStore {
    sessions: DashMap<SessionId, Arc<Mutex<SessionLog>>>,
    durable: Arc<dyn DurableStore>,
    /// Char budget applied when trimming durable rows
    durable_char_budget: usize,
}

impl HistoryStore {
    pub fn new(durable: Arc<dyn DurableStore>, durable_char_budget: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            durable,
            durable_char_budget,
        }
    }

    /// Name of the backing durable store.
    pub fn backend_name(&self) -> &str {
        self.durable.name()
    }

    pub fn is_persistent(&self) -> bool {
        self.durable.is_persistent()
    }

    /// Sessions referenced since startup.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session(&self, session: &SessionId) -> Arc<Mutex<SessionLog>> {
        self.sessions.entry(session.clone()).or_default().value().clone()
    }

    /// Load the newest durable rows into the cache.
    ///
    /// Runs again whenever a caller asks for a larger window than any earlier
    /// read, so a small first request does not hide older persisted turns.
    async fn warm(&self, session: &SessionId, log: &mut SessionLog, capacity: usize) {
        if log.diverged || log.fetched.is_some_and(|limit| limit >= capacity) {
            return;
        }
        log.fetched = Some(capacity);
        if !self.durable.is_persistent() {
            return;
        }
        match self.durable.fetch_recent(session, capacity).await {
            // Writes go through, so the cached turns are a newest suffix of `rows`
            Ok(rows) if rows.len() >= log.turns.len() => {
                debug!(session = %session, rows = rows.len(), "Warmed history cache from durable store");
                log.turns = rows.into();
            }
            Ok(rows) => {
                warn!(session = %session, rows = rows.len(), cached = log.turns.len(), "Durable store behind cache; keeping cache");
            }
            Err(e) => warn!(session = %session, "History warm-up failed: {e}"),
        }
    }

    /// Append a turn, resizing the cache to the current turn setting and
    /// writing through to the durable store.
    pub async fn append(&self, session: &SessionId, role: Role, content: &str, turns: usize) {
        let capacity = capacity_for(turns);
        let handle = self.session(session);
        let mut log = handle.lock().await;
        self.warm(session, &mut log, capacity).await;

        let turn = Turn::new(role, content);
        log.turns.push_back(turn.clone());
        log.shrink_to(capacity);

        if !self.durable.is_persistent() {
            return;
        }
        if let Err(e) = self.durable.append_turn(session, &turn).await {
            warn!(session = %session, "Durable append failed: {e}");
            log.diverged = true;
            return;
        }
        match self.durable.trim_session(session, capacity, self.durable_char_budget).await {
            Ok(0) => {}
            Ok(n) => debug!(session = %session, removed = n, "Trimmed durable history"),
            Err(e) => warn!(session = %session, "Durable trim failed: {e}"),
        }
    }

    /// The newest turns for a prompt, oldest first.
    ///
    /// Bounded first to `2 * turns` entries, then cut from the oldest end of
    /// that window until the total length fits `char_budget`.
    pub async fn recent(&self, session: &SessionId, turns: usize, char_budget: usize) -> Vec<Turn> {
        let handle = self.session(session);
        let mut log = handle.lock().await;
        self.warm(session, &mut log, capacity_for(turns)).await;

        let window = log.turns.len().min(turns.saturating_mul(2));
        let keep = retained_count(
            log.turns.iter().rev().take(window).map(Turn::char_len),
            window,
            char_budget,
        );
        log.turns.iter().skip(log.turns.len() - keep).cloned().collect()
    }

    /// Every cached turn of the session, oldest first.
    pub async fn snapshot(&self, session: &SessionId) -> Vec<Turn> {
        let Some(handle) = self.sessions.get(session).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let log = handle.lock().await;
        log.turns.iter().cloned().collect()
    }

    /// Forget the session in cache and durable store.
    ///
    /// Returns the number of durable rows removed (0 without persistence).
    pub async fn clear(&self, session: &SessionId) -> usize {
        let handle = self.session(session);
        let mut log = handle.lock().await;
        log.turns.clear();
        log.fetched = Some(usize::MAX);
        log.diverged = false;
        match self.durable.clear_session(session).await {
            Ok(n) => n,
            Err(e) => {
                warn!(session = %session, "Durable clear failed: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use crate::noop::NoopStore;

    fn volatile() -> HistoryStore {
        HistoryStore::new(Arc::new(NoopStore), 3500)
    }

    fn contents(turns: &[Turn]) -> Vec<&str> {
        turns.iter().map(|t| t.content.as_str()).collect()
    }

    #[test]
    fn retained_count_stops_at_first_overflow() {
        assert_eq!(retained_count([3, 3, 3].into_iter(), 10, 6), 2);
        assert_eq!(retained_count([3, 3, 3].into_iter(), 1, 100), 1);
        assert_eq!(retained_count([10, 1].into_iter(), 10, 5), 0);
        assert_eq!(retained_count(std::iter::empty(), 10, 5), 0);
    }

    #[tokio::test]
    async fn recent_is_bounded_to_two_n_in_order() {
        let store = volatile();
        let sid = SessionId::from("s");
        for i in 0..10 {
            store.append(&sid, Role::User, &format!("m{i}"), 8).await;
        }
        let recent = store.recent(&sid, 2, usize::MAX).await;
        assert_eq!(contents(&recent), ["m6", "m7", "m8", "m9"]);
    }

    #[tokio::test]
    async fn appends_beyond_capacity_evict_oldest() {
        let store = volatile();
        let sid = SessionId::from("s");
        for i in 0..7 {
            store.append(&sid, Role::User, &format!("m{i}"), 2).await;
        }
        // Capacity 4 regardless of the read window
        let recent = store.recent(&sid, 50, usize::MAX).await;
        assert_eq!(contents(&recent), ["m3", "m4", "m5", "m6"]);
    }

    #[tokio::test]
    async fn shrinking_capacity_keeps_newest() {
        let store = volatile();
        let sid = SessionId::from("s");
        for i in 0..8 {
            store.append(&sid, Role::User, &format!("m{i}"), 4).await;
        }
        store.append(&sid, Role::Assistant, "m8", 1).await;
        assert_eq!(contents(&store.snapshot(&sid).await), ["m7", "m8"]);

        // Growing again keeps what is there and admits more
        for i in 9..12 {
            store.append(&sid, Role::User, &format!("m{i}"), 4).await;
        }
        assert_eq!(contents(&store.snapshot(&sid).await), ["m7", "m8", "m9", "m10", "m11"]);
    }

    #[tokio::test]
    async fn char_budget_cuts_the_oldest_end() {
        let store = volatile();
        let sid = SessionId::from("s");
        store.append(&sid, Role::User, &"a".repeat(40), 8).await;
        store.append(&sid, Role::Assistant, &"b".repeat(40), 8).await;
        store.append(&sid, Role::User, &"c".repeat(40), 8).await;

        let recent = store.recent(&sid, 8, 100).await;
        assert_eq!(recent.len(), 2);
        assert!(recent[0].content.starts_with('b'));
        assert!(recent[1].content.starts_with('c'));
    }

    #[tokio::test]
    async fn zero_turns_returns_nothing() {
        let store = volatile();
        let sid = SessionId::from("s");
        store.append(&sid, Role::User, "hello", 8).await;
        assert!(store.recent(&sid, 0, usize::MAX).await.is_empty());
    }

    #[tokio::test]
    async fn cold_start_warms_from_durable_store() {
        let disk = InMemoryStore::new();
        let sid = SessionId::from("s");
        {
            let first = HistoryStore::new(Arc::new(disk.clone()), 3500);
            first.append(&sid, Role::User, "before restart", 8).await;
            first.append(&sid, Role::Assistant, "noted", 8).await;
        }

        let second = HistoryStore::new(Arc::new(disk.clone()), 3500);
        let recent = second.recent(&sid, 8, 3500).await;
        assert_eq!(contents(&recent), ["before restart", "noted"]);
    }

    #[tokio::test]
    async fn narrow_first_read_does_not_hide_older_rows() {
        let disk = InMemoryStore::new();
        let sid = SessionId::from("s");
        {
            let first = HistoryStore::new(Arc::new(disk.clone()), 3500);
            for i in 0..16 {
                first.append(&sid, Role::User, &format!("m{i}"), 8).await;
            }
        }
        assert_eq!(disk.turn_count(&sid).await, 16);

        let second = HistoryStore::new(Arc::new(disk.clone()), 3500);
        assert_eq!(contents(&second.recent(&sid, 1, 3500).await), ["m14", "m15"]);
        let wide = second.recent(&sid, 8, 3500).await;
        assert_eq!(wide.len(), 16);
        assert_eq!(wide[0].content, "m0");
        assert_eq!(wide[15].content, "m15");
    }

    #[tokio::test]
    async fn widening_after_append_keeps_new_turn() {
        let disk = InMemoryStore::new();
        let sid = SessionId::from("s");
        {
            let first = HistoryStore::new(Arc::new(disk.clone()), 3500);
            for i in 0..6 {
                first.append(&sid, Role::User, &format!("m{i}"), 8).await;
            }
        }

        let second = HistoryStore::new(Arc::new(disk.clone()), 3500);
        second.recent(&sid, 1, 3500).await;
        second.append(&sid, Role::User, "fresh", 8).await;
        let all = second.recent(&sid, 8, 3500).await;
        assert_eq!(contents(&all), ["m0", "m1", "m2", "m3", "m4", "m5", "fresh"]);
    }

    #[tokio::test]
    async fn huge_turn_count_does_not_overflow() {
        let store = volatile();
        let sid = SessionId::from("s");
        store.append(&sid, Role::User, "one", usize::MAX).await;
        store.append(&sid, Role::Assistant, "two", usize::MAX).await;
        assert_eq!(contents(&store.recent(&sid, usize::MAX, 3500).await), ["one", "two"]);
    }

    #[tokio::test]
    async fn first_append_after_restart_keeps_old_rows() {
        let disk = InMemoryStore::new();
        let sid = SessionId::from("s");
        HistoryStore::new(Arc::new(disk.clone()), 3500)
            .append(&sid, Role::User, "old", 8)
            .await;

        let second = HistoryStore::new(Arc::new(disk.clone()), 3500);
        second.append(&sid, Role::User, "new", 8).await;
        assert_eq!(contents(&second.recent(&sid, 8, 3500).await), ["old", "new"]);
    }

    #[tokio::test]
    async fn durable_rows_are_trimmed_on_append() {
        let disk = InMemoryStore::new();
        let store = HistoryStore::new(Arc::new(disk.clone()), 3500);
        let sid = SessionId::from("s");
        for i in 0..9 {
            store.append(&sid, Role::User, &format!("m{i}"), 2).await;
        }
        assert_eq!(disk.turn_count(&sid).await, 4);
    }

    #[tokio::test]
    async fn clear_reports_durable_count() {
        let disk = InMemoryStore::new();
        let store = HistoryStore::new(Arc::new(disk.clone()), 3500);
        let sid = SessionId::from("s");
        store.append(&sid, Role::User, "one", 8).await;
        store.append(&sid, Role::Assistant, "two", 8).await;

        assert_eq!(store.clear(&sid).await, 2);
        assert!(store.recent(&sid, 8, 3500).await.is_empty());

        let volatile = volatile();
        volatile.append(&sid, Role::User, "x", 8).await;
        assert_eq!(volatile.clear(&sid).await, 0);
        assert!(volatile.recent(&sid, 8, 3500).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_session_all_land() {
        // Per-session serialization keeps every append; the relative order of
        // two racing writers is last-writer-wins and not asserted here.
        let store = Arc::new(volatile());
        let sid = SessionId::from("shared");
        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let sid = sid.clone();
            tasks.push(tokio::spawn(async move {
                store.append(&sid, Role::User, &format!("w{i}"), 8).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.snapshot(&sid).await.len(), 8);
    }
}
