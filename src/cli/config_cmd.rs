use anyhow::{bail, Result};

use crate::cli::output::OutputOptions;
use crate::core::config::AppConfig;

pub fn init(opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    let config = AppConfig::default();
    let path = config.save()?;
    if opts.is_json() {
        return opts.print_json(&serde_json::json!({ "path": path }));
    }
    let ids: Vec<&str> = config.providers.iter().map(|p| p.id.as_str()).collect();
    println!("Generated config at {}", path.display());
    println!(
        "  {} provider{} enabled: {}",
        ids.len(),
        if ids.len() == 1 { "" } else { "s" },
        ids.join(", ")
    );
    Ok(())
}

pub fn path(opts: &OutputOptions) -> Result<()> {
    let config = AppConfig::load()?;
    let config_path = AppConfig::config_path();
    let state_path = config.state_path();
    if opts.is_json() {
        return opts.print_json(&serde_json::json!({
            "config": config_path,
            "state": state_path,
        }));
    }
    println!("Config: {}", config_path.display());
    println!("State:  {}", state_path.display());
    Ok(())
}

/// Enable or disable a provider in the config file.
pub fn set_enabled(provider_id: &str, enabled: bool) -> Result<()> {
    let mut config = AppConfig::load()?;
    let verb = if enabled { "enabled" } else { "disabled" };

    match config.providers.iter().find(|p| p.id == provider_id) {
        None => bail!("Unknown provider: '{}'", provider_id),
        Some(p) if p.enabled == enabled => {
            eprintln!("Provider '{}' is already {}", provider_id, verb);
            return Ok(());
        }
        Some(_) => {}
    }

    config.set_enabled(provider_id, enabled);
    let path = config.save()?;
    println!("Provider '{}' {} in {}", provider_id, verb, path.display());
    Ok(())
}

pub fn check(opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if !path.exists() {
        eprintln!("No config file found at {}", path.display());
        eprintln!("Run `llmwatch config init` to create one.");
        return Ok(());
    }

    let config = AppConfig::load()?;
    let issues = config.validate();
    let enabled: Vec<&str> = config
        .providers
        .iter()
        .filter(|p| p.enabled)
        .map(|p| p.id.as_str())
        .collect();

    if opts.is_json() {
        opts.print_json(&serde_json::json!({
            "path": path,
            "valid": issues.is_empty(),
            "issues": issues,
            "enabled": enabled,
        }))?;
    } else if issues.is_empty() {
        println!("Config is valid: {}", path.display());
        if enabled.is_empty() {
            println!("  No providers enabled.");
        } else {
            println!("  Enabled providers: {}", enabled.join(", "));
        }
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
    }

    if !issues.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
