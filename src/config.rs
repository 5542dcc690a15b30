//! Application settings, stored as JSON in the user's config directory.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR_NAME: &str = "ChatKeeper";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to find {0} directory")]
    MissingDir(&'static str),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize configuration: {0}")]
    Json(#[from] serde_json::Error),
}

// --- Configuration Structures ---

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub chat: ChatApiParams,
    pub backup: BackupParams,
    /// Static user list. Defaults to `users.json` next to the settings file.
    pub users_file: Option<PathBuf>,
    /// Overrides where the chat history and session live.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChatApiParams {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ChatApiParams {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            api_key: "".to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackupParams {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for BackupParams {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            timeout_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn users_file(&self) -> Result<PathBuf, ConfigError> {
        match &self.users_file {
            Some(path) => Ok(path.clone()),
            None => Ok(app_config_dir()?.join("users.json")),
        }
    }
}

// --- Filesystem and Config Logic ---

pub fn app_config_dir() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs_next::config_dir().ok_or(ConfigError::MissingDir("config"))?;
    Ok(config_dir.join(APP_DIR_NAME).join("configuration"))
}

pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    let data_dir = dirs_next::data_dir().ok_or(ConfigError::MissingDir("data"))?;
    Ok(data_dir.join(APP_DIR_NAME).join("data"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_config_dir()?.join("settings.json"))
}

/// Where the loaded settings came from. Reported back to the caller because
/// settings are read before logging is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file existed; one was written with defaults.
    Initialized,
    /// The file could not be parsed and was left as is; defaults are in use.
    InvalidFile(String),
}

/// Reads the settings file, writing one with defaults if none exists.
/// An unparsable file is left untouched and defaults are used instead.
pub fn load_or_initialize_config(
    config_path: &Path,
) -> Result<(AppConfig, ConfigSource), ConfigError> {
    if config_path.exists() {
        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;
        return Ok(match serde_json::from_str(&content) {
            Ok(config) => (config, ConfigSource::File),
            Err(e) => (AppConfig::default(), ConfigSource::InvalidFile(e.to_string())),
        });
    }

    let default_config = AppConfig::default();
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(config_path, serde_json::to_string_pretty(&default_config)?).map_err(|source| {
        ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        }
    })?;
    Ok((default_config, ConfigSource::Initialized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_initialized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("configuration").join("settings.json");

        let (config, source) = load_or_initialize_config(&path).unwrap();

        assert_eq!(source, ConfigSource::Initialized);
        assert!(path.exists());
        assert_eq!(config.backup.base_url, "http://127.0.0.1:3001");
        assert_eq!(config.backup.timeout_secs, 5);
        assert_eq!(config.chat.model, "llama3.2");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "backup": { "base_url": "http://10.0.2.2:3001" }, "data_dir": "/tmp/chat" }"#,
        )
        .unwrap();

        let (config, source) = load_or_initialize_config(&path).unwrap();

        assert_eq!(source, ConfigSource::File);
        assert_eq!(config.backup.base_url, "http://10.0.2.2:3001");
        assert_eq!(config.backup.timeout_secs, 5);
        assert_eq!(config.chat.max_tokens, 1024);
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/chat"));
    }

    #[test]
    fn test_corrupt_config_falls_back_without_overwriting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let (config, source) = load_or_initialize_config(&path).unwrap();

        assert!(matches!(source, ConfigSource::InvalidFile(ref reason) if !reason.is_empty()));
        assert_eq!(config.chat.endpoint, ChatApiParams::default().endpoint);
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }
}
