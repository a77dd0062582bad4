use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::{Result, anyhow};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub server_url: Option<String>,
    pub start_dir: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            server_url: None,
            start_dir: None,
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        Self::load_from(&config_path)
    }

    fn load_from(path: &PathBuf) -> Result<Self> {
        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    /// Effective server URL: env var beats config, config beats the default.
    pub fn server_url(&self) -> String {
        std::env::var("PDFCHAT_SERVER")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.server_url.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("pdfchat").join("config.json"))
    }

    /// Path for the client log file, next to the config.
    pub fn log_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("pdfchat").join("pdfchat.log"))
    }
}
