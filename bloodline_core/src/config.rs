//! Configuration file support for Bloodline.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/bloodline/config.toml`.

use crate::policy::{FulfillmentPolicy, Policy, RewardThresholds};
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub rewards: RewardThresholds,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Donation and request rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_minimum_interval_days")]
    pub minimum_interval_days: i64,

    #[serde(default = "default_points_per_donation")]
    pub points_per_donation: u64,

    #[serde(default = "default_units_per_donation")]
    pub units_per_donation: u32,

    #[serde(default)]
    pub fulfillment: FulfillmentPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            minimum_interval_days: default_minimum_interval_days(),
            points_per_donation: default_points_per_donation(),
            units_per_donation: default_units_per_donation(),
            fulfillment: FulfillmentPolicy::default(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("bloodline")
}

fn default_minimum_interval_days() -> i64 {
    crate::policy::MINIMUM_INTERVAL_DAYS
}

fn default_points_per_donation() -> u64 {
    crate::policy::POINTS_PER_DONATION
}

fn default_units_per_donation() -> u32 {
    1
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("bloodline").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.policy.minimum_interval_days <= 0 {
            return Err(Error::Config(format!(
                "minimum_interval_days must be positive, got {}",
                self.policy.minimum_interval_days
            )));
        }
        if self.policy.points_per_donation == 0 {
            return Err(Error::Config(
                "points_per_donation must be positive".into(),
            ));
        }
        let rewards = &self.rewards;
        if !(rewards.silver <= rewards.gold && rewards.gold <= rewards.platinum) {
            return Err(Error::Config(format!(
                "reward thresholds must be ascending (silver {}, gold {}, platinum {})",
                rewards.silver, rewards.gold, rewards.platinum
            )));
        }
        Ok(())
    }

    /// The policy value handed to the coordinator
    pub fn policy(&self) -> Policy {
        Policy {
            minimum_interval: Duration::days(self.policy.minimum_interval_days),
            points_per_donation: self.policy.points_per_donation,
            units_per_donation: self.policy.units_per_donation,
            fulfillment: self.policy.fulfillment,
            reward_thresholds: self.rewards.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_default_policy() {
        let config = Config::default();
        assert!(config.data.data_dir.ends_with("bloodline"));
        assert_eq!(config.policy(), Policy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.policy.fulfillment = FulfillmentPolicy::AllowDirect;
        config.data.data_dir = temp_dir.path().join("data");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.policy.fulfillment, FulfillmentPolicy::AllowDirect);
        assert_eq!(loaded.data.data_dir, config.data.data_dir);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[policy]
minimum_interval_days = 56
fulfillment = "allow_direct"

[rewards]
gold = 40
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.policy.minimum_interval_days, 56);
        assert_eq!(config.policy.points_per_donation, 10); // default
        assert_eq!(config.rewards.gold, 40);
        assert_eq!(config.rewards.platinum, 100); // default

        let policy = config.policy();
        assert_eq!(policy.minimum_interval, Duration::days(56));
        assert_eq!(policy.fulfillment, FulfillmentPolicy::AllowDirect);
    }

    #[test]
    fn test_validation_rejects_zero_interval_and_points() {
        let mut config = Config::default();
        config.policy.minimum_interval_days = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.policy.points_per_donation = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_rejects_invalid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[policy]\npoints_per_donation = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));

        std::fs::write(&path, "[policy\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Toml(_))));
    }
}
