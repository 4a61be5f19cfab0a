//! Byte-stream transports over the modem.

/// TCP/TLS socket carried by the module's IP stack.
pub mod socket;

pub use socket::AtSocket;
