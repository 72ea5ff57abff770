//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use cgmlink_core::CgmConfig;
use cgmlink_types::GlucoseUnit;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cli::ConfigKey;

/// Scan timeout when neither the flag nor the file sets one.
pub const DEFAULT_SCAN_TIMEOUT: u64 = 10;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// User scope readings are stored under
    #[serde(default)]
    pub user: Option<String>,

    /// Advertised-name filters; empty means the built-in list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_filters: Vec<String>,

    /// Consecutive link drops tolerated before an error is reported
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Database path
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Scan timeout in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Display unit ("mg/dL" or "mmol/L")
    #[serde(default)]
    pub unit: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cgmlink")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if missing or
    /// unreadable.
    pub fn load() -> Self {
        let path = Self::path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Build the core configuration. `user` and `max_attempts` override the
    /// file.
    pub fn cgm_config(&self, user: Option<&str>, max_attempts: Option<u32>) -> Result<CgmConfig> {
        let mut config = CgmConfig::default();
        if !self.name_filters.is_empty() {
            config = config.name_filters(self.name_filters.iter().cloned());
        }
        if let Some(attempts) = max_attempts.or(self.max_attempts) {
            config = config.max_attempts(attempts);
        }
        if let Some(user) = user.map(str::to_string).or_else(|| self.user.clone()) {
            config = config.user_scope(user);
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Database path: the override, then the file, then the platform default.
    pub fn database_path(&self, database: Option<&Path>) -> PathBuf {
        database
            .map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(cgmlink_store::default_db_path)
    }

    pub fn scan_timeout(&self, timeout: Option<u64>) -> u64 {
        timeout
            .or(self.scan_timeout)
            .unwrap_or(DEFAULT_SCAN_TIMEOUT)
    }

    /// Display unit, falling back to mg/dL.
    pub fn unit(&self) -> Result<GlucoseUnit> {
        match &self.unit {
            Some(unit) => GlucoseUnit::from_str(unit)
                .with_context(|| format!("Invalid unit in config: {}", unit)),
            None => Ok(GlucoseUnit::MgPerDl),
        }
    }

    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::User => self.user.clone(),
            ConfigKey::NameFilters => {
                (!self.name_filters.is_empty()).then(|| self.name_filters.join(","))
            }
            ConfigKey::MaxAttempts => self.max_attempts.map(|v| v.to_string()),
            ConfigKey::Database => self.database.as_ref().map(|p| p.display().to_string()),
            ConfigKey::ScanTimeout => self.scan_timeout.map(|v| v.to_string()),
            ConfigKey::Unit => self.unit.clone(),
        }
    }

    /// Set a value from its command-line form, validating it.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            ConfigKey::User => {
                if value.is_empty() {
                    bail!("User must not be empty");
                }
                self.user = Some(value.to_string());
            }
            ConfigKey::NameFilters => {
                let filters: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if filters.is_empty() {
                    bail!("At least one name filter is required");
                }
                self.name_filters = filters;
            }
            ConfigKey::MaxAttempts => {
                let attempts: u32 = value
                    .parse()
                    .with_context(|| format!("'{}' is not a valid number", value))?;
                if attempts == 0 {
                    bail!("max-attempts must be at least 1");
                }
                self.max_attempts = Some(attempts);
            }
            ConfigKey::Database => self.database = Some(PathBuf::from(value)),
            ConfigKey::ScanTimeout => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("'{}' is not a valid number", value))?;
                if secs == 0 {
                    bail!("scan-timeout must be at least 1 second");
                }
                self.scan_timeout = Some(secs);
            }
            ConfigKey::Unit => {
                let unit = GlucoseUnit::from_str(value)
                    .with_context(|| format!("Unknown unit '{}'", value))?;
                self.unit = Some(unit.symbol().to_string());
            }
        }
        Ok(())
    }

    pub fn unset(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::User => self.user = None,
            ConfigKey::NameFilters => self.name_filters.clear(),
            ConfigKey::MaxAttempts => self.max_attempts = None,
            ConfigKey::Database => self.database = None,
            ConfigKey::ScanTimeout => self.scan_timeout = None,
            ConfigKey::Unit => self.unit = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmlink_core::DEFAULT_MAX_ATTEMPTS;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.user.is_none());
        assert_eq!(config.scan_timeout(None), DEFAULT_SCAN_TIMEOUT);
        assert_eq!(config.unit().unwrap(), GlucoseUnit::MgPerDl);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            user = "alice"
            name_filters = ["Dexcom"]
            max_attempts = 5
            scan_timeout = 20
            unit = "mmol/L"
            "#,
        )
        .unwrap();
        assert_eq!(config.user.as_deref(), Some("alice"));
        assert_eq!(config.name_filters, vec!["Dexcom"]);
        assert_eq!(config.max_attempts, Some(5));
        assert_eq!(config.scan_timeout(None), 20);
        assert_eq!(config.scan_timeout(Some(3)), 3);
        assert_eq!(config.unit().unwrap(), GlucoseUnit::MmolPerL);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set(ConfigKey::User, "alice").unwrap();
        config.set(ConfigKey::NameFilters, "Dexcom, G7 ,").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.name_filters, vec!["Dexcom", "G7"]);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_attempts = \"lots\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_cgm_config_overrides() {
        let config = Config {
            user: Some("alice".into()),
            max_attempts: Some(5),
            name_filters: vec!["G7".into()],
            ..Default::default()
        };

        let core = config.cgm_config(None, None).unwrap();
        assert_eq!(core.user_scope.as_deref(), Some("alice"));
        assert_eq!(core.reconnect.max_attempts, 5);
        assert_eq!(core.name_filters, vec!["G7"]);

        let core = config.cgm_config(Some("bob"), Some(2)).unwrap();
        assert_eq!(core.user_scope.as_deref(), Some("bob"));
        assert_eq!(core.reconnect.max_attempts, 2);
    }

    #[test]
    fn test_cgm_config_defaults() {
        let core = Config::default().cgm_config(None, None).unwrap();
        assert_eq!(core.reconnect.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(core.user_scope.is_none());
        assert_eq!(core.name_filters, vec!["Dexcom", "CGM"]);
    }

    #[test]
    fn test_cgm_config_rejects_zero_attempts() {
        assert!(Config::default().cgm_config(None, Some(0)).is_err());
    }

    #[test]
    fn test_set_validates_values() {
        let mut config = Config::default();
        assert!(config.set(ConfigKey::MaxAttempts, "0").is_err());
        assert!(config.set(ConfigKey::MaxAttempts, "many").is_err());
        assert!(config.set(ConfigKey::ScanTimeout, "0").is_err());
        assert!(config.set(ConfigKey::Unit, "furlongs").is_err());
        assert!(config.set(ConfigKey::NameFilters, " , ").is_err());
        assert!(config.set(ConfigKey::User, "  ").is_err());

        config.set(ConfigKey::Unit, "MMOL/L").unwrap();
        assert_eq!(config.get(ConfigKey::Unit).as_deref(), Some("mmol/L"));
    }

    #[test]
    fn test_get_and_unset() {
        let mut config = Config::default();
        assert_eq!(config.get(ConfigKey::ScanTimeout), None);
        config.set(ConfigKey::ScanTimeout, "30").unwrap();
        assert_eq!(config.get(ConfigKey::ScanTimeout).as_deref(), Some("30"));
        config.unset(ConfigKey::ScanTimeout);
        assert_eq!(config.get(ConfigKey::ScanTimeout), None);
    }

    #[test]
    fn test_database_path_precedence() {
        let config = Config {
            database: Some(PathBuf::from("/tmp/file.db")),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(Some(Path::new("/tmp/flag.db"))),
            PathBuf::from("/tmp/flag.db")
        );
        assert_eq!(config.database_path(None), PathBuf::from("/tmp/file.db"));
        assert_eq!(
            Config::default().database_path(None),
            cgmlink_store::default_db_path()
        );
    }
}
