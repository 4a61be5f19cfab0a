//! HTTP over the module's built-in HTTP client.
//!
//! The module performs the exchange; the host creates a session, configures
//! it, issues the request and then receives the response headers and body as
//! hex-encoded notifications:
//!
//! ```text
//! +MHTTPCREATE: <id>
//! +MHTTPURC: "header",<id>,<status>,<len>,<hex headers>
//! +MHTTPURC: "content",<id>,<content_len>,<sum_len>,<cur_len>,<hex data>
//! +MHTTPURC: "err",<id>,<code>
//! ```
//!
//! ```rust,no_run
//! use libmodem::network::Http;
//! use libmodem::network::application::http::{AtHttp, Method};
//! # use libmodem::modem::{AtModem, SerialPort};
//! # fn demo<S: SerialPort>(modem: &AtModem<S>) -> Result<(), libmodem::Error> {
//! let mut http = AtHttp::new(modem);
//! http.set_header("Accept", "application/json");
//! http.open(Method::Get, "https://example.com/api/status")?;
//!
//! let mut buf = [0u8; 256];
//! loop {
//!     let n = http.read(&mut buf)?;
//!     if n == 0 {
//!         break;
//!     }
//!     // consume &buf[..n]
//! }
//! http.close();
//! # Ok(())
//! # }
//! ```

/// HTTP session adapter and supporting types.
pub mod client;

pub use client::{AtHttp, Method, Url, error_description, parse_url};
