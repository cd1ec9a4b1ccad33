//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// GeoAttend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub session: SessionDefaults,
    pub database: DatabaseSettings,
    pub channel: ChannelSettings,
}

/// Defaults applied when a session start request leaves fields unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    pub default_radius_meters: f64,
    pub default_lock_duration_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file path; defaults to the platform config directory when unset
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Broadcast buffer size per subscriber before lagging clients drop events
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionDefaults {
                default_radius_meters: 100.0,
                default_lock_duration_minutes: 120,
            },
            database: DatabaseSettings {
                path: None,
                max_connections: 5,
            },
            channel: ChannelSettings { capacity: 1000 },
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("GEOATTEND_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("geoattend")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            // Return default config without creating file
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.session.default_radius_meters.is_finite()
            || self.session.default_radius_meters <= 0.0
        {
            return Err(anyhow!("session.default_radius_meters must be a positive number"));
        }
        if self.session.default_lock_duration_minutes == 0 {
            return Err(anyhow!("session.default_lock_duration_minutes must be at least 1"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.channel.capacity == 0 {
            return Err(anyhow!("channel.capacity must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Session settings
            "session.default_radius_meters" => Ok(self.session.default_radius_meters.to_string()),
            "session.default_lock_duration_minutes" => {
                Ok(self.session.default_lock_duration_minutes.to_string())
            }

            // Database settings
            "database.path" => Ok(self
                .database
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string())),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),

            // Channel settings
            "channel.capacity" => Ok(self.channel.capacity.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `geoattend config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            // Session settings
            "session.default_radius_meters" => {
                let radius: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid default_radius_meters value: {}", value))?;
                if !radius.is_finite() || radius <= 0.0 {
                    return Err(anyhow!("Radius must be a positive number of meters"));
                }
                self.session.default_radius_meters = radius;
            }
            "session.default_lock_duration_minutes" => {
                let minutes: u64 = value.parse().with_context(|| {
                    format!("Invalid default_lock_duration_minutes value: {}", value)
                })?;
                if minutes == 0 {
                    return Err(anyhow!("Lock duration must be at least 1 minute"));
                }
                self.session.default_lock_duration_minutes = minutes;
            }

            // Database settings
            "database.path" => {
                self.database.path = Some(PathBuf::from(value));
            }
            "database.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be at least 1"));
                }
                self.database.max_connections = max;
            }

            // Channel settings
            "channel.capacity" => {
                let capacity: usize = value
                    .parse()
                    .with_context(|| format!("Invalid capacity value: {}", value))?;
                if capacity == 0 {
                    return Err(anyhow!("Channel capacity must be at least 1"));
                }
                self.channel.capacity = capacity;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `geoattend config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "session.default_radius_meters",
            "session.default_lock_duration_minutes",
            "database.path",
            "database.max_connections",
            "channel.capacity",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.default_radius_meters, 100.0);
        assert_eq!(config.session.default_lock_duration_minutes, 120);
    }

    #[test]
    fn test_get_and_set_round_trip() {
        let mut config = Config::default();

        config.set("session.default_radius_meters", "75.5").unwrap();
        assert_eq!(config.get("session.default_radius_meters").unwrap(), "75.5");

        config
            .set("session.default_lock_duration_minutes", "90")
            .unwrap();
        assert_eq!(
            config.get("session.default_lock_duration_minutes").unwrap(),
            "90"
        );

        config.set("database.path", "/tmp/geoattend.db").unwrap();
        assert_eq!(config.get("database.path").unwrap(), "/tmp/geoattend.db");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();

        assert!(config.set("session.default_radius_meters", "-5").is_err());
        assert!(config.set("session.default_radius_meters", "NaN").is_err());
        assert!(config.set("session.default_radius_meters", "wide").is_err());
        assert!(config.set("session.default_lock_duration_minutes", "0").is_err());
        assert!(config.set("database.max_connections", "0").is_err());
        assert!(config.set("channel.capacity", "0").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut config = Config::default();
        assert!(config.get("session.nonexistent").is_err());
        assert!(config.set("session.nonexistent", "1").is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let items = config.list().unwrap();
        let keys: Vec<&str> = items.iter().map(|(k, _)| k.as_str()).collect();

        assert!(keys.contains(&"session.default_radius_meters"));
        assert!(keys.contains(&"session.default_lock_duration_minutes"));
        assert!(keys.contains(&"database.path"));
        assert!(keys.contains(&"database.max_connections"));
        assert!(keys.contains(&"channel.capacity"));
    }

    #[test]
    fn test_load_from_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_from(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_load_from_round_trips_through_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.set("session.default_radius_meters", "42").unwrap();
        let contents = toml::to_string_pretty(&config).unwrap();
        fs::write(&path, contents).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.session.default_radius_meters, 42.0);
    }

    #[test]
    fn test_load_from_rejects_bad_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        fs::write(&path, "not valid toml {{{").unwrap();
        assert!(Config::load_from(&path).is_err());

        // Well-formed TOML with an out-of-range value fails validation
        fs::write(
            &path,
            "[session]\ndefault_radius_meters = -1.0\ndefault_lock_duration_minutes = 120\n\
             [database]\nmax_connections = 5\n\n[channel]\ncapacity = 1000\n",
        )
        .unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
