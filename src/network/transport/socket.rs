//! TCP/TLS socket carried by the module's own IP stack.
//!
//! Each [`AtSocket`] owns one of the module's numbered socket slots. Commands
//! go through the shared [`AtModem`]; everything the module reports about the
//! slot (open result, send acknowledgements, received data, disconnects)
//! arrives as notifications and is folded into a small state struct guarded
//! by a mutex and a condition variable.
//!
//! ```text
//! +MIPSTATE: <id>,...,"<state>"   slot state, answers AT+MIPSTATE
//! +MIPOPEN: <id>,<result>         0 = connected
//! +MIPSEND: <id>,<len>            one chunk handed to the network
//! +MIPURC: "rtcp",<id>,<len>,<hex> received data
//! +MIPURC: "disconn",<id>,...     peer closed
//! +MIPCLOSE: <id>                 close acknowledged
//! ```

use core::fmt::Write as _;
use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use crate::modem::{
    AtModem, FIFO_OVERFLOW, ListenerHandle, SerialPort, Urc, decode_hex_append, encode_hex_append,
};
use crate::network::Transport;
use crate::network::error::Error;

/// Largest payload per send command; hex doubles it on the wire.
pub const MAX_CHUNK_SIZE: usize = 1460 / 2;

#[derive(Debug, Default)]
struct SocketState {
    connected: bool,
    initialized: bool,
    opened: bool,
    open_result: i64,
    failed: bool,
    disconnected: bool,
    overflow: bool,
    close_pending: bool,
    send_complete: bool,
    rx_buffer: Vec<u8>,
}

impl SocketState {
    fn mark_disconnected(&mut self) {
        self.connected = false;
        self.disconnected = true;
    }
}

#[derive(Debug)]
struct SocketShared {
    id: i64,
    state: Mutex<SocketState>,
    cv: Condvar,
}

impl SocketShared {
    fn lock(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until<F>(&self, timeout: Duration, mut ready: F) -> MutexGuard<'_, SocketState>
    where
        F: FnMut(&SocketState) -> bool,
    {
        let state = self.lock();
        self.cv
            .wait_timeout_while(state, timeout, |s| !ready(s))
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    fn handle(&self, urc: &Urc) {
        let state = match urc.command.as_str() {
            "MIPOPEN" if urc.len() == 2 && urc.int(0) == Some(self.id) => {
                let mut state = self.lock();
                let result = urc.int(1).unwrap_or(-1);
                state.open_result = result;
                if result == 0 {
                    state.connected = true;
                    state.disconnected = false;
                    state.failed = false;
                    state.opened = true;
                } else {
                    state.connected = false;
                    state.failed = true;
                }
                state
            }
            "MIPCLOSE" if !urc.is_empty() && urc.int(0) == Some(self.id) => {
                let mut state = self.lock();
                state.mark_disconnected();
                state.close_pending = false;
                state
            }
            "MIPSEND" if urc.len() == 2 && urc.int(0) == Some(self.id) => {
                let mut state = self.lock();
                state.send_complete = true;
                state
            }
            "MIPURC" if urc.len() >= 2 && urc.int(1) == Some(self.id) => {
                let mut state = self.lock();
                match urc.str(0) {
                    Some("rtcp") if urc.len() >= 4 => {
                        let data = urc.str(3).unwrap_or_default();
                        decode_hex_append(&mut state.rx_buffer, data.as_bytes());
                    }
                    Some("disconn") => state.mark_disconnected(),
                    other => warn!(socket = self.id, kind = ?other, "unknown MIPURC notification"),
                }
                state
            }
            "MIPSTATE" if urc.len() == 5 && urc.int(0) == Some(self.id) => {
                let mut state = self.lock();
                state.connected = urc.str(4) != Some("INITIAL");
                state.initialized = true;
                state
            }
            FIFO_OVERFLOW => {
                let mut state = self.lock();
                if state.connected {
                    state.close_pending = true;
                }
                state.overflow = true;
                state.failed = true;
                state.mark_disconnected();
                state
            }
            _ => return,
        };
        drop(state);
        self.cv.notify_all();
    }
}

/// A TCP or TLS stream on one of the module's socket slots.
///
/// ```rust,no_run
/// # use libmodem::modem::{AtModem, SerialPort};
/// # use libmodem::network::Transport;
/// # use libmodem::network::transport::AtSocket;
/// # fn demo<S: SerialPort>(modem: &AtModem<S>) -> Result<(), libmodem::Error> {
/// let mut socket = AtSocket::new_tls(modem, 0);
/// socket.connect("example.com", 443)?;
/// socket.send(b"GET / HTTP/1.0\r\n\r\n")?;
/// let mut buf = [0u8; 512];
/// let n = socket.receive(&mut buf)?;
/// # let _ = n;
/// # Ok(())
/// # }
/// ```
pub struct AtSocket<'m, S: SerialPort> {
    modem: &'m AtModem<S>,
    shared: Arc<SocketShared>,
    listener: ListenerHandle,
    tls: bool,
}

impl<S: SerialPort> core::fmt::Debug for AtSocket<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AtSocket")
            .field("id", &self.shared.id)
            .field("tls", &self.tls)
            .field("connected", &self.connected())
            .finish()
    }
}

impl<'m, S: SerialPort> AtSocket<'m, S> {
    /// Plain TCP on socket slot `id`.
    pub fn new(modem: &'m AtModem<S>, id: u8) -> Self {
        Self::with_security(modem, id, false)
    }

    /// TLS on socket slot `id`. Server certificates are not verified.
    pub fn new_tls(modem: &'m AtModem<S>, id: u8) -> Self {
        Self::with_security(modem, id, true)
    }

    fn with_security(modem: &'m AtModem<S>, id: u8, tls: bool) -> Self {
        let shared = Arc::new(SocketShared {
            id: id.into(),
            state: Mutex::new(SocketState::default()),
            cv: Condvar::new(),
        });
        let listener_state = Arc::clone(&shared);
        let listener = modem.register_listener(move |urc: &Urc| listener_state.handle(urc));
        Self {
            modem,
            shared,
            listener,
            tls,
        }
    }

    /// Socket slot this adapter owns.
    pub fn id(&self) -> i64 {
        self.shared.id
    }

    fn timeout(&self) -> Duration {
        self.modem.config().socket_timeout()
    }

    fn fail_send(&self) {
        self.shared.lock().mark_disconnected();
        self.shared.cv.notify_all();
    }
}

impl<S: SerialPort> Transport for AtSocket<'_, S> {
    type Error = Error;

    fn connected(&self) -> bool {
        self.shared.lock().connected
    }

    fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        let id = self.shared.id;
        {
            let mut state = self.shared.lock();
            state.opened = false;
            state.failed = false;
            state.disconnected = false;
            state.overflow = false;
            state.initialized = false;
        }

        let _ = self.modem.command(&format!("AT+MIPSTATE={}", id));
        let initialized = self.shared.wait_until(self.timeout(), |s| s.initialized).initialized;
        if !initialized {
            error!(socket = id, "failed to query socket state");
            return Err(Error::Timeout);
        }

        if self.connected() {
            self.disconnect();
        }

        if self.tls {
            self.modem.command("AT+MSSLCFG=\"auth\",0,0").inspect_err(|_| {
                error!(socket = id, "failed to set SSL configuration");
            })?;
        }
        self.modem
            .command(&format!("AT+MIPCFG=\"ssl\",{},{},0", id, u8::from(self.tls)))
            .inspect_err(|_| error!(socket = id, "failed to set socket security mode"))?;
        self.modem
            .command(&format!("AT+MIPCFG=\"encoding\",{},1,1", id))
            .inspect_err(|_| error!(socket = id, "failed to set hex encoding"))?;

        {
            let mut state = self.shared.lock();
            state.opened = false;
            state.failed = false;
            state.disconnected = false;
            state.rx_buffer.clear();
        }
        self.modem
            .command(&format!("AT+MIPOPEN={},\"TCP\",\"{}\",{},,0", id, host, port))
            .inspect_err(|_| error!(socket = id, host, port, "failed to open socket"))?;

        let state = self.shared.wait_until(self.timeout(), |s| s.opened || s.failed);
        if state.failed {
            error!(socket = id, host, port, result = state.open_result, "failed to connect");
            return Err(Error::ConnectionRefused(state.open_result as i32));
        }
        if !state.opened {
            error!(socket = id, host, port, "timed out connecting");
            return Err(Error::Timeout);
        }
        info!(socket = id, host, port, tls = self.tls, "connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        let needs_close = {
            let mut state = self.shared.lock();
            let needs_close = state.connected || state.close_pending;
            state.mark_disconnected();
            state.close_pending = false;
            needs_close
        };
        self.shared.cv.notify_all();
        if needs_close {
            let _ = self.modem.command(&format!("AT+MIPCLOSE={}", self.shared.id));
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        let id = self.shared.id;
        {
            let state = self.shared.lock();
            if !state.connected {
                return Err(if state.disconnected {
                    Error::ConnectionClosed
                } else {
                    Error::NotConnected
                });
            }
        }

        let mut command = String::with_capacity(32 + MAX_CHUNK_SIZE * 2);
        let mut total_sent = 0;
        while total_sent < data.len() {
            let chunk = &data[total_sent..data.len().min(total_sent + MAX_CHUNK_SIZE)];

            command.clear();
            let _ = write!(command, "AT+MIPSEND={},{},", id, chunk.len());
            encode_hex_append(&mut command, chunk);

            self.shared.lock().send_complete = false;
            if let Err(e) = self.modem.command(&command) {
                error!(socket = id, offset = total_sent, "failed to send chunk");
                self.fail_send();
                return Err(e);
            }

            let mut state = self.shared.wait_until(self.timeout(), |s| s.send_complete);
            if !state.send_complete {
                drop(state);
                error!(socket = id, offset = total_sent, "no send acknowledgement");
                self.fail_send();
                return Err(Error::Timeout);
            }
            state.send_complete = false;
            drop(state);

            total_sent += chunk.len();
        }
        Ok(total_sent)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let state = self.shared.lock();
        let mut state = self
            .shared
            .cv
            .wait_while(state, |s| s.rx_buffer.is_empty() && s.connected && !s.disconnected)
            .unwrap_or_else(PoisonError::into_inner);
        if state.rx_buffer.is_empty() {
            return if state.overflow {
                Err(Error::Overflow)
            } else {
                Ok(0)
            };
        }
        let length = buf.len().min(state.rx_buffer.len());
        buf[..length].copy_from_slice(&state.rx_buffer[..length]);
        state.rx_buffer.drain(..length);
        Ok(length)
    }
}

impl<S: SerialPort> Drop for AtSocket<'_, S> {
    fn drop(&mut self) {
        self.disconnect();
        self.modem.unregister_listener(self.listener);
    }
}
