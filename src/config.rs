//! Engine and adapter configuration.
//!
//! A [`Config`] can be built in code or read from a JSON document, e.g. one
//! stored in flash next to the firmware:
//!
//! ```rust
//! use libmodem::Config;
//!
//! let config = Config::from_json(r#"{"baud_rate":921600,"debug":true}"#).unwrap();
//! assert_eq!(config.baud_rate, 921600);
//! assert_eq!(config.command_timeout_ms, 3000);
//! ```

use core::time::Duration;
use serde::Deserialize;

/// Runtime settings for [`AtModem`](crate::modem::AtModem) and the session adapters.
///
/// Missing JSON fields fall back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Serial rate the engine opens the channel with.
    pub baud_rate: u32,
    /// Default wait for a command terminator.
    pub command_timeout_ms: u32,
    /// Wait for HTTP session creation, response headers and body data.
    pub http_timeout_ms: u32,
    /// Wait for MQTT state, connect and disconnect notifications.
    pub mqtt_timeout_ms: u32,
    /// Wait for socket state, connect and per-chunk send acknowledgements.
    pub socket_timeout_ms: u32,
    /// Interval between status polls while waiting for the network.
    pub network_poll_ms: u32,
    /// Largest single read from the serial driver.
    pub rx_chunk_size: usize,
    /// Trace every command and every received line.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            command_timeout_ms: 3_000,
            http_timeout_ms: 30_000,
            mqtt_timeout_ms: 10_000,
            socket_timeout_ms: 10_000,
            network_poll_ms: 1_000,
            rx_chunk_size: 1_024,
            debug: false,
        }
    }
}

impl Config {
    /// Parse a JSON document. Unknown fields are rejected.
    pub fn from_json(json: &str) -> Result<Self, serde_json_core::de::Error> {
        serde_json_core::from_str::<Self>(json).map(|(config, _)| config)
    }

    /// [`command_timeout_ms`](Self::command_timeout_ms) as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.into())
    }

    /// [`http_timeout_ms`](Self::http_timeout_ms) as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.into())
    }

    /// [`mqtt_timeout_ms`](Self::mqtt_timeout_ms) as a [`Duration`].
    pub fn mqtt_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt_timeout_ms.into())
    }

    /// [`socket_timeout_ms`](Self::socket_timeout_ms) as a [`Duration`].
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms.into())
    }

    /// [`network_poll_ms`](Self::network_poll_ms) as a [`Duration`].
    pub fn network_poll(&self) -> Duration {
        Duration::from_millis(self.network_poll_ms.into())
    }
}
