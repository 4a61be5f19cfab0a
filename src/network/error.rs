//! Common error types for modem-backed network operations

/// A common error type for modem-backed network operations.
///
/// The engine and every session adapter report failures through this enum.
/// It stays `Copy` so adapters can hand the same fault to several waiters
/// without allocating.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum Error {
    /// An operation was attempted on a session that is not open.
    #[error("session is not open")]
    NotOpen,
    /// An operation that needs a live broker or peer connection found none.
    #[error("not connected")]
    NotConnected,
    /// Writing to the serial channel failed.
    #[error("serial write failed")]
    WriteError,
    /// The modem answered the command with an error terminator.
    #[error("command rejected by modem")]
    CommandFailed,
    /// The command was issued without waiting for a terminator.
    #[error("command sent without waiting for a response")]
    NoResponse,
    /// A timeout occurred.
    #[error("timed out")]
    Timeout,
    /// The stream was closed by the peer, the modem or a local disconnect.
    #[error("connection closed")]
    ConnectionClosed,
    /// The modem reported a receive buffer overflow; the session is dead.
    #[error("modem receive buffer overflow")]
    Overflow,
    /// A background task of the engine could not be started.
    #[error("failed to start modem task")]
    TaskSpawn,
    /// An invalid address was provided.
    #[error("invalid address")]
    InvalidAddress,
    /// Notification accounting did not add up.
    #[error("protocol error")]
    ProtocolError,
    /// The SIM reported a PIN state other than `READY`.
    #[error("SIM PIN not ready")]
    PinNotReady,
    /// The network denied registration.
    #[error("network registration denied")]
    RegistrationDenied,
    /// The HTTP exchange completed with a status code of 400 or above.
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    /// The modem reported an HTTP transport error code.
    #[error("HTTP request error {0}")]
    HttpRequest(i32),
    /// The broker refused or dropped the connection with the given state code.
    #[error("connection refused with code {0}")]
    ConnectionRefused(i32),
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotOpen => defmt::write!(f, "NotOpen"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::CommandFailed => defmt::write!(f, "CommandFailed"),
            Error::NoResponse => defmt::write!(f, "NoResponse"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ConnectionClosed => defmt::write!(f, "ConnectionClosed"),
            Error::Overflow => defmt::write!(f, "Overflow"),
            Error::TaskSpawn => defmt::write!(f, "TaskSpawn"),
            Error::InvalidAddress => defmt::write!(f, "InvalidAddress"),
            Error::ProtocolError => defmt::write!(f, "ProtocolError"),
            Error::PinNotReady => defmt::write!(f, "PinNotReady"),
            Error::RegistrationDenied => defmt::write!(f, "RegistrationDenied"),
            Error::HttpStatus(code) => defmt::write!(f, "HttpStatus({})", code),
            Error::HttpRequest(code) => defmt::write!(f, "HttpRequest({})", code),
            Error::ConnectionRefused(code) => defmt::write!(f, "ConnectionRefused({})", code),
        }
    }
}
