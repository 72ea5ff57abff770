//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result, bail};
use cgmlink_core::{DEFAULT_MAX_ATTEMPTS, DEFAULT_NAME_FILTERS};
use cgmlink_types::GlucoseUnit;

use crate::cli::{ConfigAction, ConfigKey};
use crate::config::{Config, DEFAULT_SCAN_TIMEOUT};

pub fn cmd_config(action: ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = load_or_default(path)?;
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("# {}", path.display());
            print!("{}", content);
        }
        ConfigAction::Init => {
            if path.exists() {
                bail!("Config file already exists: {}", path.display());
            }
            starter_config().save_to(path)?;
            println!("Created {}", path.display());
        }
        ConfigAction::Get { key } => {
            let config = load_or_default(path)?;
            match config.get(key) {
                Some(value) => println!("{}", value),
                None => println!("(not set)"),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = load_or_default(path)?;
            config.set(key, &value)?;
            config.save_to(path)?;
            println!("{} = {}", key_name(key), config.get(key).unwrap_or_default());
        }
        ConfigAction::Unset { key } => {
            let mut config = load_or_default(path)?;
            config.unset(key);
            config.save_to(path)?;
            println!("{} unset", key_name(key));
        }
    }
    Ok(())
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load_from(path)
    } else {
        Ok(Config::default())
    }
}

/// Defaults written out so users can see what to edit.
fn starter_config() -> Config {
    Config {
        name_filters: DEFAULT_NAME_FILTERS.iter().map(|s| s.to_string()).collect(),
        max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        scan_timeout: Some(DEFAULT_SCAN_TIMEOUT),
        unit: Some(GlucoseUnit::MgPerDl.symbol().to_string()),
        ..Default::default()
    }
}

fn key_name(key: ConfigKey) -> &'static str {
    match key {
        ConfigKey::User => "user",
        ConfigKey::NameFilters => "name_filters",
        ConfigKey::MaxAttempts => "max_attempts",
        ConfigKey::Database => "database",
        ConfigKey::ScanTimeout => "scan_timeout",
        ConfigKey::Unit => "unit",
    }
}
