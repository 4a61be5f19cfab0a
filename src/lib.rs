//! # libmodem - networking through a cellular AT modem
//!
//! Many IoT boards reach the Internet only through a cellular module that
//! hangs off a UART and speaks AT commands. The module runs its own TCP/IP,
//! TLS, HTTP and MQTT stacks; the host drives them with text commands and
//! receives results as asynchronous notification lines. This crate turns that
//! line protocol into ordinary blocking Rust APIs.
//!
//! ## Layers
//!
//! ### Command engine ([`modem`])
//! - Single-writer command channel with per-command timeouts
//! - Background tasks that read the serial port and classify lines
//! - Notification listeners with per-registration handles
//! - Network bring-up (`wait_for_network_ready`), baud detection and device queries
//!
//! ### Session adapters ([`network`])
//! - **Socket**: TCP/TLS byte streams implementing [`network::Transport`]
//! - **HTTP**: single-request client implementing [`network::Http`]
//! - **MQTT**: publish/subscribe with fragmented-message reassembly
//!
//! ## Usage
//!
//! ```rust,no_run
//! use libmodem::{AtModem, Config};
//! use libmodem::modem::SerialPort;
//! use libmodem::network::Http;
//! use libmodem::network::application::http::{AtHttp, Method};
//!
//! # fn demo<S: SerialPort>(serial: S) -> Result<(), libmodem::Error> {
//! let modem = AtModem::new(serial, Config::default())?;
//! modem.wait_for_network_ready()?;
//!
//! let mut http = AtHttp::new(&modem);
//! http.open(Method::Get, "https://example.com/")?;
//! let body = http.body();
//! # let _ = body;
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - `defmt`: `defmt::Format` for [`Error`]

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Runtime configuration: serial rate, timeouts and debug tracing.
pub mod config;

/// AT-command engine, line parser, hex coding and notification listeners.
pub mod modem;

/// Network contracts and the session adapters that implement them.
///
/// Sockets live in [`network::transport`]; HTTP and MQTT in
/// [`network::application`].
pub mod network;

pub use config::Config;
pub use modem::{AtModem, NetworkState, PinState, SerialEvent, SerialPort, Urc, UrcHandler};
pub use network::error::Error;
