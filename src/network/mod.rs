//! Network contracts served over the modem.
//!
//! The traits here are what the rest of the application programs against.
//! The AT-backed adapters in [`transport`] and [`application`] implement
//! them, and so can a native TCP/TLS stack or HTTP client, which keeps
//! consumers such as a WebSocket layer independent of how bytes reach the
//! Internet.

#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Byte-stream transports
pub mod transport;

/// Application protocols (HTTP, MQTT)
pub mod application;

pub use application::http::Method;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Http, Transport};
}

/// A connection-oriented byte stream (TCP or TLS).
pub trait Transport {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Whether the stream is currently open.
    fn connected(&self) -> bool;
    /// Open a stream to `host:port`, closing any previous one first.
    fn connect(&mut self, host: &str, port: u16) -> Result<(), Self::Error>;
    /// Close the stream. Best-effort; never fails.
    fn disconnect(&mut self);
    /// Send all of `data`, returning the number of bytes sent.
    ///
    /// Fails with `NotConnected` before the first connect and with
    /// `ConnectionClosed` once the stream has been closed by either side.
    fn send(&mut self, data: &[u8]) -> Result<usize, Self::Error>;
    /// Block until data arrives or the stream closes. `Ok(0)` means closed,
    /// except for an empty `buf`, which returns `Ok(0)` at once and leaves
    /// buffered data in place.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// A single-request HTTP client.
///
/// Configure with [`set_header`](Http::set_header) and
/// [`set_content`](Http::set_content), then [`open`](Http::open) and stream
/// the body with [`read`](Http::read).
pub trait Http {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Add or replace a request header.
    fn set_header(&mut self, key: &str, value: &str);
    /// Request body for body-bearing methods.
    fn set_content(&mut self, content: &[u8]);
    /// Send the request and wait for the response headers.
    fn open(&mut self, method: Method, url: &str) -> Result<(), Self::Error>;
    /// Release the request. Best-effort; never fails.
    fn close(&mut self);
    /// Status code of the last response.
    fn status_code(&self) -> u16;
    /// Value of a response header, if present.
    fn response_header(&self, key: &str) -> Option<String>;
    /// Body length announced by the server, 0 if unknown.
    fn body_length(&self) -> usize;
    /// Wait for the complete body and return it.
    fn body(&mut self) -> Vec<u8>;
    /// Read the next part of the body. `Ok(0)` marks the end.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}
