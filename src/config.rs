use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_command_timeout", with = "duration_text")]
    pub command_timeout: Duration,
    #[serde(default = "default_nic_interface")]
    pub nic_interface: String,
    #[serde(default = "default_zpools")]
    pub zpools: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            command_timeout: default_command_timeout(),
            nic_interface: default_nic_interface(),
            zpools: default_zpools(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(format!(
                "listen '{}' must be a host:port socket address",
                self.listen
            )));
        }
        if self.command_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "command_timeout must be > 0".to_string(),
            ));
        }
        validate_word("nic_interface", &self.nic_interface)?;
        for pool in &self.zpools {
            validate_word("zpools[*]", pool)?;
        }
        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_word(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} must not be empty")));
    }
    if value.chars().any(char::is_whitespace) || value.starts_with('-') {
        return Err(ConfigError::Validation(format!(
            "{field} '{value}' must be a single name"
        )));
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:9100".to_string()
}

const fn default_command_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_nic_interface() -> String {
    "aggr0".to_string()
}

fn default_zpools() -> Vec<String> {
    vec!["zones".to_string()]
}

mod duration_text {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(D::Error::custom)
    }
}
