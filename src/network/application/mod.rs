//! # Application protocols over the modem
//!
//! Session adapters for protocols the radio module terminates itself. Each
//! adapter borrows an [`AtModem`](crate::modem::AtModem), registers one
//! notification listener filtered by its session id, and turns the module's
//! asynchronous notifications into blocking calls with timeouts.
//!
//! - **[`http`]**: single-request HTTP/HTTPS client implementing [`Http`](crate::network::Http)
//! - **[`mqtt`]**: MQTT client with fragmented-message reassembly

/// HTTP session adapter.
pub mod http;

/// MQTT session adapter.
pub mod mqtt;
