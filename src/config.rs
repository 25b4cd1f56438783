use reqwest::Url;
use std::{env, net::SocketAddr, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid environment variable format for {0}: {1}")]
    InvalidVar(String, String),
}

/// Where the stores read and write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    /// A hosted backend speaking PostgREST tables and GoTrue auth.
    Rest { url: Url, anon_key: String },
    /// In-process tables, lost on exit.
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub backend: BackendConfig,
}

impl Config {
    /// Loads configuration from `.env` (when present) and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(".env file loaded from path: {}", path.display()),
            Err(_) => tracing::info!(".env file not found, relying on environment variables"),
        };

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:3000".to_string());
        let bind_address = SocketAddr::from_str(&bind_address_str)
            .map_err(|e| ConfigError::InvalidVar("BIND_ADDRESS".into(), e.to_string()))?;

        let mode = lookup("MEME_BACKEND").unwrap_or_else(|| "rest".to_string());
        let backend = match mode.trim().to_ascii_lowercase().as_str() {
            "memory" => BackendConfig::Memory,
            "rest" => {
                let url_str = lookup("MEME_BACKEND_URL")
                    .ok_or_else(|| ConfigError::MissingVar("MEME_BACKEND_URL".into()))?;
                let url = Url::parse(&url_str)
                    .map_err(|e| ConfigError::InvalidVar("MEME_BACKEND_URL".into(), e.to_string()))?;
                let anon_key = lookup("MEME_BACKEND_ANON_KEY")
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingVar("MEME_BACKEND_ANON_KEY".into()))?;
                BackendConfig::Rest { url, anon_key }
            }
            other => {
                return Err(ConfigError::InvalidVar(
                    "MEME_BACKEND".into(),
                    format!("expected 'rest' or 'memory', got '{}'", other),
                ));
            }
        };

        Ok(Config { bind_address, backend })
    }
}
