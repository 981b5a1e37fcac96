use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the analysis service
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Directory holding the session snapshot and the exchange guard
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Where the session snapshot is persisted
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Pause between a terminal `complete` event and the completion
    /// callback, so a final 100% state stays visible
    #[serde(default = "default_complete_grace_ms")]
    pub complete_grace_ms: u64,
    /// How many detail lines the running log keeps for display
    #[serde(default = "default_detail_window")]
    pub detail_window: usize,
}

// Defaults
fn default_api_url() -> String { "http://localhost:8000".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_complete_grace_ms() -> u64 { 1000 }
fn default_detail_window() -> usize { 5 }

fn default_state_dir() -> PathBuf {
    let home = env::var("HOME").unwrap_or_default();
    PathBuf::from(format!("{}/.config/bugsight", home))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            state_dir: default_state_dir(),
            storage: StorageBackend::default(),
            log_level: default_log_level(),
            progress: ProgressConfig::default(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            complete_grace_ms: default_complete_grace_ms(),
            detail_window: default_detail_window(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config_path = env::var("BUGSIGHT_CONFIG").unwrap_or_else(|_| {
            let home_config = format!(
                "{}/.config/bugsight/config.toml",
                env::var("HOME").unwrap_or_default()
            );
            let locations = vec!["./bugsight.toml", home_config.as_str()];

            for path in locations {
                if Path::new(path).exists() {
                    return path.to_string();
                }
            }

            String::new()
        });

        let mut config = if config_path.is_empty() {
            Config::default()
        } else {
            let config_content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path))?;

            let config_content = Self::substitute_env_vars(&config_content);

            toml::from_str(&config_content)
                .with_context(|| format!("Failed to parse config file: {}", config_path))?
        };

        // Environment overrides the file
        if let Ok(api_url) = env::var("BUGSIGHT_API_URL") {
            config.api_url = api_url;
        }
        if let Ok(state_dir) = env::var("BUGSIGHT_STATE_DIR") {
            config.state_dir = PathBuf::from(state_dir);
        }

        config.api_url = config.api_url.trim_end_matches('/').to_string();

        Ok(config)
    }

    /// Substitute ${VAR_NAME} with environment variable values
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = env::var(var_name).unwrap_or_default();
                result.replace_range(start..start + end + 1, &value);
            } else {
                break;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        unsafe { env::set_var("BUGSIGHT_TEST_VAR", "test_value") };

        let input = "api_url = \"${BUGSIGHT_TEST_VAR}\"";
        let output = Config::substitute_env_vars(input);

        assert_eq!(output, "api_url = \"test_value\"");

        unsafe { env::remove_var("BUGSIGHT_TEST_VAR") };
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.storage, StorageBackend::File);
        assert_eq!(config.progress.complete_grace_ms, 1000);
        assert_eq!(config.progress.detail_window, 5);
    }

    #[test]
    fn test_storage_backend_parse() {
        let config: Config = toml::from_str("storage = \"keyring\"").unwrap();
        assert_eq!(config.storage, StorageBackend::Keyring);
    }
}
