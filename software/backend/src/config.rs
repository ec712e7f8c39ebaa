// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <config.rs>

//! Settings, loaded from an optional TOML file.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! idle_warn_secs = 5
//!
//! [framing]
//! mode = "fixed"      # or "per_chunk"
//! frame_len = 18
//! sync_byte = 2
//!
//! [server]
//! bind = "127.0.0.1:4000"
//! open_on_start = false
//!
//! [logging]
//! filter = "info"
//! event_log = "/var/log/weighbridge/events.jsonl"
//! ```
//!
//! Every key is optional. Line settings (baud, data bits, parity, stop bits)
//! are fixed by the indicator and not configurable.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::accumulator::FramingMode;
use crate::error::ConfigError;
use crate::frame::MIN_FRAME_LEN;

pub const CONFIG_ENV: &str = "WEIGHBRIDGE_CONFIG";
pub const PORT_ENV: &str = "WEIGHBRIDGE_SERIAL_PORT";

/// Serial weighing-indicator bridge for a weighbridge front desk.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Cli {
    /// TOML settings file. Defaults apply when omitted.
    #[arg(env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Serial port of the weighing indicator, overrides `serial.port`.
    #[arg(long, env = PORT_ENV)]
    pub port: Option<String>,
}

#[cfg(windows)]
const DEFAULT_PORT: &str = "COM1";
#[cfg(not(windows))]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialSettings,
    pub framing: FramingMode,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    /// Warn when an open port has been silent this long. 0 disables.
    pub idle_warn_secs: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            idle_warn_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Open the port at start-up instead of on the first poll.
    pub open_on_start: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4000".to_string(),
            open_on_start: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// env_logger filter, overridden by RUST_LOG.
    pub filter: String,
    /// Append every pipeline event as a JSON line to this file.
    pub event_log: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            event_log: None,
        }
    }
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads `path`, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Settings for a parsed command line: the config file (if any), then
    /// the port override.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut settings = Self::load(cli.config.as_deref())?;
        if let Some(port) = &cli.port {
            settings.serial.port = port.clone();
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.port is empty".into()));
        }
        if self.server.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind is empty".into()));
        }
        if let FramingMode::Fixed { frame_len, .. } = self.framing {
            if frame_len <= MIN_FRAME_LEN {
                return Err(ConfigError::Invalid(format!(
                    "framing.frame_len must be greater than {}, got {}",
                    MIN_FRAME_LEN, frame_len
                )));
            }
        }
        Ok(())
    }
}
