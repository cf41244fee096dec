//! `chatrelay memory`: Export or clear a session's stored memory.
//!
//! Both commands read the durable store directly, so they only see
//! anything when `memory.persist` is enabled.

use chatrelay_config::{AppConfig, MemoryConfig};
use chatrelay_core::message::SessionId;
use chatrelay_core::store::DurableStore;
use chatrelay_memory::{HistoryStore, StickyStore};
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn export(session: &str, turns: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = chatrelay_gateway::open_store(&config.memory).await;
    if !store.is_persistent() {
        println!("Persistence is disabled (memory.persist = false); nothing is stored.");
        return Ok(());
    }

    let exported = export_from(store, &config.memory, session, turns).await;
    println!("{}", serde_json::to_string_pretty(&exported)?);
    Ok(())
}

pub async fn clear(session: &str, confirm: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirm {
        return Err(format!("Refusing to clear session '{session}' without --confirm").into());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = chatrelay_gateway::open_store(&config.memory).await;
    if !store.is_persistent() {
        println!("Persistence is disabled (memory.persist = false); nothing to clear.");
        return Ok(());
    }

    let (removed, facts_removed) = clear_from(store, &config.memory, session).await;
    println!("Cleared session '{session}': {removed} turn(s), {facts_removed} sticky fact(s)");
    Ok(())
}

async fn export_from(
    store: Arc<dyn DurableStore>,
    memory: &MemoryConfig,
    session: &str,
    turns: Option<usize>,
) -> Value {
    let session = SessionId::new(session);
    let history = HistoryStore::new(store.clone(), memory.max_chars);
    let sticky = StickyStore::new(store, memory.max_sticky_keys);

    let turns = turns.unwrap_or(memory.turns).max(1);
    let recent = history.recent(&session, turns, memory.max_chars).await;
    let facts: serde_json::Map<String, Value> = sticky
        .facts(&session)
        .await
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    json!({
        "session_id": session.as_str(),
        "sticky": facts,
        "history": recent,
    })
}

async fn clear_from(store: Arc<dyn DurableStore>, memory: &MemoryConfig, session: &str) -> (usize, usize) {
    let session = SessionId::new(session);
    let history = HistoryStore::new(store.clone(), memory.max_chars);
    let sticky = StickyStore::new(store, memory.max_sticky_keys);
    (history.clear(&session).await, sticky.clear(&session).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::message::{Role, Turn};
    use chatrelay_memory::InMemoryStore;

    async fn seeded() -> Arc<dyn DurableStore> {
        let store = InMemoryStore::new();
        let sid = SessionId::new("s1");
        for i in 0..6 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append_turn(&sid, &Turn::new(role, format!("t{i}"))).await.unwrap();
        }
        store.upsert_fact(&sid, "mood", "happy").await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn export_limits_to_requested_turns() {
        let exported = export_from(seeded().await, &MemoryConfig::default(), "s1", Some(1)).await;
        assert_eq!(exported["session_id"], "s1");
        assert_eq!(exported["sticky"]["mood"], "happy");
        let history = exported["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["content"], "t4");
        assert_eq!(history[1]["content"], "t5");
    }

    #[tokio::test]
    async fn clear_reports_counts() {
        let store = seeded().await;
        let counts = clear_from(store.clone(), &MemoryConfig::default(), "s1").await;
        assert_eq!(counts, (6, 1));

        let exported = export_from(store, &MemoryConfig::default(), "s1", None).await;
        assert!(exported["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_requires_confirmation() {
        assert!(clear("s1", false).await.is_err());
    }
}
