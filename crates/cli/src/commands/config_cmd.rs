//! `chatrelay config`: Print the default configuration.

use chatrelay_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", AppConfig::default_toml());
    Ok(())
}
