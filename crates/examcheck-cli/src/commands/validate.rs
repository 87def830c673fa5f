//! The `examcheck validate` command.

use std::path::PathBuf;

use anyhow::Result;

use examcheck_machines::load_config_from;

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;

    println!(
        "Test: '{}' ({}) on {}",
        config.test.title, config.test.id, config.test.server_url
    );
    println!("Machines: {}", config.machines.len());
    for (name, url) in &config.machines {
        println!("  {name} -> {url}");
    }
    println!("Settings:");
    for line in config.settings.status_lines() {
        println!("  {line}");
    }
    println!("Workarounds:");
    for line in config.workarounds.status_lines() {
        println!("  {line}");
    }

    config.validate()?;
    println!("Configuration valid.");
    Ok(())
}
