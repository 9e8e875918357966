//! `relaymind init`: first-time setup.

use relaymind_config::AppConfig;
use std::path::Path;

pub fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let workspace = AppConfig::default().workspace();
    init_at(&config_dir, &workspace, force)
}

fn init_at(config_dir: &Path, workspace: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_dir.join("config.toml");

    println!("relaymind setup");
    println!("===============\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
        println!("  Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if !workspace.exists() {
        std::fs::create_dir_all(workspace)?;
        println!("  Created workspace: {}", workspace.display());
    }

    if config_path.exists() && !force {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or re-run with --force.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Wrote config: {}", config_path.display());
    println!("\n  Next steps:");
    println!("    1. Set RELAYMIND_API_KEY or add api_key to {}", config_path.display());
    println!("    2. Run: relaymind chat");
    println!("    3. Or serve the API: relaymind serve\n");

    Ok(())
}
