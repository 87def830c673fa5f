//! The `examcheck init` command.

use std::fmt::Write as _;

use anyhow::Result;

use examcheck_core::settings::{CatalogEntry, Settings, Workarounds};
use examcheck_machines::config::TEMPLATE;

pub fn execute() -> Result<()> {
    if std::path::Path::new("examcheck.toml").exists() {
        println!("examcheck.toml already exists, skipping.");
    } else {
        std::fs::write("examcheck.toml", starter_config())?;
        println!("Created examcheck.toml");
    }

    println!("\nNext steps:");
    println!("  1. Point [machines] at your workers (`examcheck machine --listen ...`)");
    println!("  2. Run: examcheck validate");
    println!("  3. Run: examcheck master");

    Ok(())
}

/// The template followed by every setting and workaround, commented out.
fn starter_config() -> String {
    let mut config = TEMPLATE.to_string();
    append_catalog(&mut config, "settings", &Settings::catalog());
    append_catalog(&mut config, "workarounds", &Workarounds::catalog());
    config
}

fn append_catalog(out: &mut String, section: &str, entries: &[CatalogEntry]) {
    let _ = writeln!(out, "\n# All [{section}] and their defaults:");
    for entry in entries {
        let _ = writeln!(out, "# {} = {}", entry.key, toml_value(&entry.default));
        let _ = writeln!(out, "#     {}", entry.description);
    }
}

/// Defaults are rendered from JSON; strings need quotes in TOML.
fn toml_value(value: &str) -> String {
    if value.parse::<f64>().is_ok() || value == "true" || value == "false" {
        value.to_string()
    } else {
        format!("{value:?}")
    }
}
