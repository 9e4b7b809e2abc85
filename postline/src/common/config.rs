/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::path::Path;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[cfg(feature = "tcpip")]
use crate::common::tcpip::TcpIpConfig;

/// Configuration for postline.
///
/// Loaded from `$XDG_CONFIG_HOME/postline/config.toml`. Every section and key
/// is optional; missing values take their defaults.
///
/// ```toml
/// [dispatcher]
/// response_timeout_ms = 1000
/// acknowledge = false
/// acknowledge_timeout_ms = 100
/// max_retransmissions = 0
///
/// [tcpip]
/// host = "127.0.0.1"
/// base_port = 6666
/// reconnect_interval_ms = 500
/// connect_timeout_ms = 1000
/// max_payload_size = 65535
/// outbound_queue_capacity = 256
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostlineConfig {
    /// Dispatcher timing and acknowledge settings
    pub dispatcher: DispatcherConfig,
    /// Hosted TCP/IP transport settings
    #[cfg(feature = "tcpip")]
    pub tcpip: TcpIpConfig,
}

/// Dispatcher timing and acknowledge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How long an action call with a callback waits for its answer
    pub response_timeout_ms: u64,
    /// Send and expect acknowledge headers for directed packets
    pub acknowledge: bool,
    /// How long a directed packet waits for its acknowledge
    pub acknowledge_timeout_ms: u64,
    /// Resends of an unacknowledged packet before giving up
    pub max_retransmissions: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1_000,
            acknowledge: false,
            acknowledge_timeout_ms: 100,
            max_retransmissions: 0,
        }
    }
}

impl DispatcherConfig {
    /// Response timeout as a [`Duration`]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Acknowledge timeout as a [`Duration`]
    pub const fn acknowledge_timeout(&self) -> Duration {
        Duration::from_millis(self.acknowledge_timeout_ms)
    }
}

/// Failure to read or parse an explicitly given configuration file.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// The file could not be read.
    Io(String),
    /// The file is not valid configuration TOML.
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read configuration: {e}"),
            Self::Parse(e) => write!(f, "Failed to parse configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl PostlineConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or mistyped values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if its content is malformed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Loads configuration from `$XDG_CONFIG_HOME/postline/config.toml`.
    ///
    /// Falls back to the defaults when no file exists, and logs an error and
    /// uses the defaults when the file cannot be read or parsed.
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("postline") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("{} ({}), using defaults", e, path.display());
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// Global configuration loaded once from the XDG config directory
    pub static ref CONFIG: PostlineConfig = PostlineConfig::load();
}
