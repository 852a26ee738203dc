//! Configuration management for the Astra voice client

pub mod file;

use std::path::{Path, PathBuf};

use crate::protocol::OutboundFraming;
use crate::voice::CaptureParams;
use crate::{Error, Result};

use self::file::AstraConfigFile;

/// Default listener service endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws";

/// Astra client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// WebSocket endpoint of the listener service
    pub server_url: String,

    /// Microphone acquisition parameters
    pub capture: CaptureParams,

    /// How finished clips are framed on the wire
    pub framing: OutboundFraming,

    /// Config file the values were read from, if any
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            capture: CaptureParams::default(),
            framing: OutboundFraming::Raw,
            source: None,
        }
    }
}

impl Config {
    /// Load configuration (flag/env > toml > default)
    ///
    /// `server_override` carries `--server` / `ASTRA_SERVER_URL`. An explicit
    /// `path` must exist and parse; the default path is optional.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unusable or a value is invalid
    pub fn load(server_override: Option<String>, path: Option<&Path>) -> Result<Self> {
        let (fc, source) = match path {
            Some(path) => (file::load_config_file_from(path)?, Some(path.to_path_buf())),
            None => (
                file::load_config_file(),
                file::config_file_path().filter(|p| p.exists()),
            ),
        };

        let mut config = Self::from_file(fc, server_override)?;
        config.source = source;
        Ok(config)
    }

    /// Overlay a parsed config file and an optional server override on the defaults
    ///
    /// # Errors
    ///
    /// Returns error if a resulting value is invalid
    pub fn from_file(fc: AstraConfigFile, server_override: Option<String>) -> Result<Self> {
        let defaults = CaptureParams::default();

        let config = Self {
            server_url: server_override
                .or(fc.server.url)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            capture: CaptureParams {
                channels: fc.capture.channels.unwrap_or(defaults.channels),
                sample_rate: fc.capture.sample_rate.unwrap_or(defaults.sample_rate),
                bits_per_sample: fc.capture.bit_depth.unwrap_or(defaults.bits_per_sample),
            },
            framing: fc.capture.framing.unwrap_or_default(),
            source: None,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values the session cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "server url must use ws:// or wss://, got {}",
                self.server_url
            )));
        }
        if !(1..=2).contains(&self.capture.channels) {
            return Err(Error::Config(format!(
                "capture channels must be 1 or 2, got {}",
                self.capture.channels
            )));
        }
        if self.capture.sample_rate == 0 {
            return Err(Error::Config("capture sample rate must be positive".to_string()));
        }
        if self.capture.bits_per_sample != 16 {
            return Err(Error::Config(format!(
                "capture bit depth must be 16, got {}",
                self.capture.bits_per_sample
            )));
        }
        Ok(())
    }
}
