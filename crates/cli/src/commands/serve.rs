//! `relaymind serve`: start the gateway.

use relaymind_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("relaymind gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {}", config.default_provider);
    println!("   Agents:    {}", config.agents.len());
    println!("   Chains:    {}", config.chains.len());

    relaymind_gateway::start(config).await?;

    Ok(())
}
