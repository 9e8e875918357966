//! `relaymind commands`: list the commands an agent may call.

use relaymind_agent::{AgentDirectory, ConfigAgentStore};
use relaymind_config::AppConfig;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(agent: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let commands = Arc::new(relaymind_tools::default_registry(Duration::from_secs(
        config.orchestrator.command_timeout_secs,
    )));
    let directory = AgentDirectory::new(
        Arc::new(ConfigAgentStore::new(&config.agents)),
        commands.clone(),
        Duration::from_secs(config.cache.agent_ttl_secs),
        config.cache.agent_capacity,
    );
    let profile = directory.get(agent).await;

    let descriptors = commands.enabled_descriptors(agent);
    println!("  Agent: {} ({})", profile.id, descriptors.len());
    for descriptor in descriptors {
        println!("\n  {}", descriptor.name);
        println!("    {}", descriptor.description);
        for param in &descriptor.parameters {
            let marker = if param.required { "required" } else { "optional" };
            println!(
                "    - {} ({:?}, {marker}): {}",
                param.name, param.ty, param.description
            );
        }
    }

    Ok(())
}
