//! `chatrelay serve`: Start the HTTP bridge.

use chatrelay_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("chatrelay");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Upstream:  {}", config.upstream.chat_url().as_deref().unwrap_or("(not configured)"));
    println!("   Persist:   {}", config.memory.persist);

    chatrelay_gateway::start(config).await?;

    Ok(())
}
