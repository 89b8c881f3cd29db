//! Configuration file loading and error types.

use std::{fs, path::Path};

use crate::error::ParseError;
use crate::types::{ChainConfig, FileConfig};
use crate::validate::validate_chain;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("chain: {0}")]
    Chain(#[from] ParseError),
    #[error("validation: {0}")]
    Validation(String),
}

/// Load a CLI config file. The format is chosen by extension
/// (`toml`, `json`, or `jsonc` with comments).
pub fn load_file_config(path: impl AsRef<Path>) -> Result<FileConfig, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    let config: FileConfig = match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "json" | "jsonc" => {
            let stripped = json_comments::StripComments::new(data.as_bytes());
            serde_json::from_reader(stripped)?
        }
        "toml" => toml::from_str(&data)?,
        _ => return Err(ConfigError::UnsupportedFormat),
    };
    config.validate()?;
    Ok(config)
}

impl FileConfig {
    /// Validated chain section.
    pub fn chain_config(&self) -> Result<ChainConfig, ParseError> {
        validate_chain(&self.chain)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let listener = &self.listener;
        if listener.host.trim().is_empty() {
            return Err(ConfigError::Validation("listener.host is empty".into()));
        }
        if listener.username.is_some() != listener.password.is_some() {
            return Err(ConfigError::Validation(
                "listener.username and listener.password must be set together".into(),
            ));
        }
        if listener.max_connections == 0 {
            return Err(ConfigError::Validation(
                "listener.max_connections must be > 0".into(),
            ));
        }
        if listener.handshake_timeout_secs == 0 || listener.idle_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "listener timeouts must be > 0".into(),
            ));
        }
        if listener.relay_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "listener.relay_buffer_size must be > 0".into(),
            ));
        }
        self.chain_config()?;
        Ok(())
    }
}
