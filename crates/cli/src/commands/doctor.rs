//! `chatrelay doctor`: Diagnose system health.

use chatrelay_config::AppConfig;
use chatrelay_memory::SqliteStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("chatrelay doctor — system diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ⚠️  No config file at {} — using defaults", config_path.display());
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    for warning in upstream_warnings(&config) {
        println!("  ⚠️  {warning}");
        issues += 1;
    }
    if let Some(url) = config.upstream.chat_url() {
        println!("  ✅ Upstream endpoint: {url}");
    }

    if config.auth.token.is_empty() {
        println!("  ⚠️  Auth token is empty — every caller is admitted");
        issues += 1;
    } else if config.auth.token == "change-me" {
        println!("  ⚠️  Auth token is still the default — set CHATRELAY_AUTH_TOKEN");
        issues += 1;
    }

    if !config.enabled {
        println!("  ⚠️  Bridge is disabled (enabled = false)");
        issues += 1;
    }

    if config.memory.persist {
        match SqliteStore::new(&config.memory.db_path).await {
            Ok(_) => println!("  ✅ Database reachable at {}", config.memory.db_path),
            Err(e) => {
                println!("  ❌ Database at {} unusable: {e}", config.memory.db_path);
                issues += 1;
            }
        }
    } else {
        println!("  ✅ Persistence disabled — memory lives in process only");
    }

    println!("  ✅ {} profile(s) configured", config.profiles.len());

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// Missing upstream settings, in the order they should be fixed.
fn upstream_warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.upstream.api_url.trim().is_empty() {
        warnings.push("No upstream URL — set upstream.api_url or CHATRELAY_API_URL");
    }
    if config.upstream.api_key.is_empty() {
        warnings.push("No upstream API key — set CHATRELAY_API_KEY");
    }
    warnings
}
