//! Wiring of the chat engine from configuration.
//!
//! Persistence is decided here, once: a working SQLite store when
//! `memory.persist` is on and the database opens, the no-op store otherwise.

use chatrelay_config::{AppConfig, MemoryConfig};
use chatrelay_core::completion::CompletionClient;
use chatrelay_core::store::DurableStore;
use chatrelay_engine::{ChatOrchestrator, ChatSettings, ProfileResolver};
use chatrelay_memory::{HistoryStore, NoopStore, SqliteStore, StickyStore};
use chatrelay_providers::{OpenAiCompatClient, TimeoutClient};
use chatrelay_security::StaticAuthGate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Open the durable store selected by the memory configuration.
pub async fn open_store(config: &MemoryConfig) -> Arc<dyn DurableStore> {
    if !config.persist {
        return Arc::new(NoopStore);
    }
    match SqliteStore::new(&config.db_path).await {
        Ok(store) => {
            info!(path = %config.db_path, "Persistence enabled");
            Arc::new(store)
        }
        Err(e) => {
            warn!(path = %config.db_path, error = %e, "Could not open database, persistence disabled");
            Arc::new(NoopStore)
        }
    }
}

/// Build the orchestrator and its collaborators from `config`.
pub async fn build_orchestrator(config: &AppConfig) -> chatrelay_core::Result<ChatOrchestrator> {
    let durable = open_store(&config.memory).await;
    let sticky = Arc::new(StickyStore::new(durable.clone(), config.memory.max_sticky_keys));
    let history = Arc::new(HistoryStore::new(durable, config.memory.max_chars));

    let upstream = OpenAiCompatClient::from_config(&config.upstream)?;
    if !upstream.is_ready() {
        warn!("Upstream URL not configured, chat calls will fail");
    }
    let client = Arc::new(TimeoutClient::new(
        Arc::new(upstream),
        Duration::from_secs(config.upstream.timeout_secs),
    ));

    let orchestrator = ChatOrchestrator::new(
        Arc::new(StaticAuthGate::from_config(&config.auth)),
        client,
        sticky,
        history,
        ProfileResolver::from_config(config),
        ChatSettings::from_config(config),
    );
    orchestrator.set_enabled(config.enabled);
    Ok(orchestrator)
}
