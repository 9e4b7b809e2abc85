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

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::ComponentId;

/// Settings of the hosted TCP/IP transport.
///
/// The server listens on `base_port`. The receiver of component `id` listens
/// on `base_port + 1 + id`, so one host can run at most 255 components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpIpConfig {
    /// Server host name or address.
    pub host: String,

    /// Port of the server. Receiver ports are derived from it.
    pub base_port: u16,

    /// Pause between connection attempts, in milliseconds.
    pub reconnect_interval_ms: u64,

    /// Upper bound for a single connection attempt, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Largest payload accepted in one frame. Never more than 65535.
    pub max_payload_size: usize,

    /// Packets a client or server route buffers before refusing more.
    pub outbound_queue_capacity: usize,
}

impl Default for TcpIpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 6666,
            reconnect_interval_ms: 500,
            connect_timeout_ms: 1_000,
            max_payload_size: usize::from(u16::MAX),
            outbound_queue_capacity: 256,
        }
    }
}

impl TcpIpConfig {
    /// Reconnect interval as a [`Duration`].
    pub const fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `host:base_port`.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.base_port)
    }

    /// Port of the receiver for `component`, `None` if it would overflow.
    pub fn receiver_port(&self, component: ComponentId) -> Option<u16> {
        receiver_port(self.base_port, component)
    }

    /// The payload limit, clamped to what the length field can carry.
    pub fn payload_limit(&self) -> usize {
        self.max_payload_size.min(usize::from(u16::MAX))
    }
}

pub(crate) fn receiver_port(base_port: u16, component: ComponentId) -> Option<u16> {
    base_port.checked_add(1)?.checked_add(u16::from(component))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_ports_follow_base_port() {
        let config = TcpIpConfig::default();
        assert_eq!(config.receiver_port(0x01), Some(6668));
        assert_eq!(config.receiver_port(0xFF), Some(6922));
        assert_eq!(receiver_port(u16::MAX - 10, 0x20), None);
    }

    #[test]
    fn test_payload_limit_is_clamped() {
        let config = TcpIpConfig {
            max_payload_size: 1 << 20,
            ..TcpIpConfig::default()
        };
        assert_eq!(config.payload_limit(), 65535);
        assert_eq!(config.server_address(), "127.0.0.1:6666");
    }
}
