//! TOML configuration file loading
//!
//! Supports `~/.config/astra/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::protocol::OutboundFraming;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AstraConfigFile {
    /// Remote service connection
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Microphone acquisition and clip framing
    #[serde(default)]
    pub capture: CaptureFileConfig,
}

/// Server connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// WebSocket endpoint (e.g. "ws://localhost:8000/ws")
    pub url: Option<String>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bit_depth: Option<u16>,

    /// "raw" or "wav"
    pub framing: Option<OutboundFraming>,
}

/// Load the TOML config file from the standard path
///
/// Returns `AstraConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AstraConfigFile {
    let Some(path) = config_file_path() else {
        return AstraConfigFile::default();
    };

    if !path.exists() {
        return AstraConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            AstraConfigFile::default()
        }
    }
}

/// Load an explicitly named config file
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file_from(path: &Path) -> Result<AstraConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/astra/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("astra").join("config.toml"))
}
