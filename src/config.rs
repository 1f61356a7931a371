use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::markdown::MarkdownOptions;

fn default_endpoint() -> String {
    "http://localhost:10000/api/chat".to_string()
}

fn default_customer_id() -> u64 {
    1
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub render: MarkdownOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_customer_id")]
    pub customer_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            endpoint: default_endpoint(),
            customer_id: default_customer_id(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 520,
            height: 720,
            min_width: 360,
            min_height: 400,
        }
    }
}

impl Config {
    /// Load `~/.config/ens-chat/config.toml`, falling back to defaults, then
    /// apply environment overrides.
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        let mut config = if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("{e:#}. Using defaults.");
                    Config::default()
                }
            }
        } else {
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Error reading {}: {e}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Error parsing {}: {e}", path.display()))
    }

    /// `ENS_CHAT_ENDPOINT` and `ENS_CHAT_CUSTOMER_ID` win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("ENS_CHAT_ENDPOINT").filter(|s| !s.trim().is_empty()) {
            self.backend.endpoint = endpoint;
        }
        if let Some(raw) = lookup("ENS_CHAT_CUSTOMER_ID") {
            match raw.trim().parse() {
                Ok(id) => self.backend.customer_id = id,
                Err(_) => tracing::warn!("Ignoring invalid ENS_CHAT_CUSTOMER_ID: {raw}"),
            }
        }
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/ens-chat")
        } else {
            PathBuf::from(".")
        }
    }
}
