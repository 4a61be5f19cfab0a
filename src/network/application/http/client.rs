use core::fmt::Write as _;
use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::modem::{
    AtModem, FIFO_OVERFLOW, ListenerHandle, SerialPort, Urc, decode_hex, decode_hex_append, encode_hex_append,
};
use crate::network::Http;
use crate::network::error::Error;

/// Bytes the module delivers per content notification.
const FRAGMENT_SIZE: usize = 1024;
/// Pause between content notifications, in milliseconds.
const FRAGMENT_INTERVAL_MS: u32 = 100;

/// HTTP request methods supported by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`, carries a body.
    Post,
    /// `PUT`, carries a body.
    Put,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
}

impl Method {
    /// Method name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    /// Method code used by `AT+MHTTPREQUEST`.
    pub fn code(&self) -> u8 {
        match self {
            Method::Get => 1,
            Method::Post => 2,
            Method::Put => 3,
            Method::Delete => 4,
            Method::Head => 5,
        }
    }

    /// Whether content set with [`Http::set_content`] is sent.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

/// The parts of a URL the module needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    /// Scheme, e.g. `https`.
    pub protocol: &'a str,
    /// Host with optional `:port`.
    pub host: &'a str,
    /// Path and query, `/` when absent.
    pub path: &'a str,
}

/// Split `url` into protocol, host and path.
///
/// ```rust
/// use libmodem::network::application::http::parse_url;
///
/// let url = parse_url("https://example.com/api?x=1").unwrap();
/// assert_eq!(url.protocol, "https");
/// assert_eq!(url.host, "example.com");
/// assert_eq!(url.path, "/api?x=1");
/// ```
pub fn parse_url(url: &str) -> Result<Url<'_>, Error> {
    let (protocol, rest) = url.split_once("://").ok_or(Error::InvalidAddress)?;
    if protocol.is_empty() {
        return Err(Error::InvalidAddress);
    }
    let (host, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };
    if host.is_empty() {
        return Err(Error::InvalidAddress);
    }
    Ok(Url { protocol, host, path })
}

/// Text for an error code carried by an `"err"` notification.
pub fn error_description(code: i32) -> &'static str {
    match code {
        1 => "DNS resolution failed",
        2 => "failed to connect to server",
        3 => "connection to server timed out",
        4 => "TLS handshake failed",
        5 => "connection closed unexpectedly",
        6 => "response timed out",
        7 => "failed to parse received data",
        8 => "out of buffer space",
        9 => "data lost",
        10 => "failed to write file",
        255 => "unknown error",
        _ => "undefined error",
    }
}

// One header per line, split on the first colon. Lines without one (the
// status line) are skipped.
fn parse_headers(raw: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

fn length_arg(urc: &Urc, index: usize) -> Option<usize> {
    urc.int(index).and_then(|v| usize::try_from(v).ok())
}

#[derive(Debug, Default)]
struct HttpState {
    session: Option<i64>,
    open: bool,
    delete_pending: bool,
    headers_received: bool,
    failed: bool,
    error_code: i32,
    status_code: u16,
    response_headers: Vec<(String, String)>,
    content_length: usize,
    body: Vec<u8>,
    body_offset: usize,
    eof: bool,
    fault: bool,
    overflow: bool,
}

impl HttpState {
    // The delete command is left to the caller side: listeners never issue
    // commands.
    fn fault_close(&mut self) {
        if self.open {
            self.delete_pending = true;
        }
        self.open = false;
        self.fault = true;
        self.eof = true;
    }

    fn on_header(&mut self, urc: &Urc) {
        let (Some(status), Some(raw)) = (urc.int(2), urc.str(4)) else {
            warn!(session = ?self.session, "malformed header notification");
            self.fault_close();
            return;
        };
        self.status_code = u16::try_from(status).unwrap_or(0);
        self.response_headers = parse_headers(&decode_hex(raw));
        self.content_length = find_header(&self.response_headers, "Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        self.body.clear();
        self.body_offset = 0;
        self.eof = find_header(&self.response_headers, "Content-Length") == Some("0");
        self.headers_received = true;
    }

    fn on_content(&mut self, urc: &Urc) {
        // "content",<id>,<content_len>,<sum_len>,<cur_len>,<data>
        let (Some(content_len), Some(sum_len), Some(cur_len), Some(data)) = (
            length_arg(urc, 2),
            length_arg(urc, 3),
            length_arg(urc, 4),
            urc.str(5),
        ) else {
            warn!(session = ?self.session, "malformed content notification");
            self.fault_close();
            return;
        };

        let offset = self.body_offset + cur_len;
        if sum_len > offset {
            error!(
                session = ?self.session,
                offset,
                sum_len,
                "content offset mismatch, closing session"
            );
            self.fault_close();
            return;
        }
        decode_hex_append(&mut self.body, data.as_bytes());
        self.body_offset = offset;
        if sum_len >= content_len {
            self.eof = true;
        }
    }
}

#[derive(Debug)]
struct HttpShared {
    state: Mutex<HttpState>,
    cv: Condvar,
}

impl HttpShared {
    fn lock(&self) -> MutexGuard<'_, HttpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until<F>(&self, timeout: Duration, mut ready: F) -> MutexGuard<'_, HttpState>
    where
        F: FnMut(&HttpState) -> bool,
    {
        let state = self.lock();
        self.cv
            .wait_timeout_while(state, timeout, |s| !ready(s))
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    fn handle(&self, urc: &Urc) {
        let mut state = self.lock();
        match urc.command.as_str() {
            "MHTTPURC" => {
                if !state.open || urc.len() < 2 || urc.int(1) != state.session {
                    return;
                }
                match urc.str(0) {
                    Some("header") => state.on_header(urc),
                    Some("content") => state.on_content(urc),
                    Some("err") => {
                        state.error_code = urc.int(2).map_or(255, |code| code as i32);
                        state.failed = true;
                    }
                    other => {
                        debug!(session = ?state.session, kind = ?other, "unhandled MHTTPURC notification");
                        return;
                    }
                }
            }
            FIFO_OVERFLOW => {
                if !state.open {
                    return;
                }
                state.overflow = true;
                state.fault_close();
            }
            _ => return,
        }
        drop(state);
        self.cv.notify_all();
    }
}

/// HTTP client backed by the module's HTTP stack.
///
/// One adapter runs one request at a time. Headers and content persist
/// between requests; the response is replaced on every [`open`](Http::open).
/// Dropping the adapter deletes its session on the module.
pub struct AtHttp<'m, S: SerialPort> {
    modem: &'m AtModem<S>,
    shared: Arc<HttpShared>,
    listener: ListenerHandle,
    headers: Vec<(String, String)>,
    content: Vec<u8>,
}

impl<S: SerialPort> core::fmt::Debug for AtHttp<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("AtHttp")
            .field("session", &state.session)
            .field("open", &state.open)
            .field("status_code", &state.status_code)
            .field("headers", &self.headers.len())
            .finish()
    }
}

impl<'m, S: SerialPort> AtHttp<'m, S> {
    /// Create an adapter; no session exists on the module until [`open`](Http::open).
    pub fn new(modem: &'m AtModem<S>) -> Self {
        let shared = Arc::new(HttpShared {
            state: Mutex::new(HttpState::default()),
            cv: Condvar::new(),
        });
        let listener_state = Arc::clone(&shared);
        let listener = modem.register_listener(move |urc: &Urc| listener_state.handle(urc));
        Self {
            modem,
            shared,
            listener,
            headers: Vec::new(),
            content: Vec::new(),
        }
    }

    /// Session id assigned by the module, once created.
    pub fn session_id(&self) -> Option<i64> {
        self.shared.lock().session
    }

    /// Transport error code from the last `"err"` notification, 0 if none.
    pub fn error_code(&self) -> i32 {
        self.shared.lock().error_code
    }

    fn timeout(&self) -> Duration {
        self.modem.config().http_timeout()
    }

    // Session configuration is best-effort; a rejected option surfaces later
    // as a failed request.
    fn configure(&self, id: i64, command: &str) {
        if let Err(e) = self.modem.command(command) {
            warn!(session = id, error = %e, "HTTP configuration rejected");
        }
    }
}

impl<S: SerialPort> Http for AtHttp<'_, S> {
    type Error = Error;

    fn set_header(&mut self, key: &str, value: &str) {
        match self.headers.iter_mut().find(|(name, _)| name == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.headers.push((key.to_string(), value.to_string())),
        }
    }

    fn set_content(&mut self, content: &[u8]) {
        self.content = content.to_vec();
    }

    fn open(&mut self, method: Method, url: &str) -> Result<(), Error> {
        let url = parse_url(url).inspect_err(|_| error!(url, "invalid URL"))?;
        self.close();
        *self.shared.lock() = HttpState::default();

        let create = format!("AT+MHTTPCREATE=\"{}://{}\"", url.protocol, url.host);
        let created = self
            .modem
            .command_capture(&create, "MHTTPCREATE", self.timeout())
            .inspect_err(|e| error!(host = url.host, error = %e, "failed to create HTTP session"))?;
        let Some(id) = created.int(0) else {
            error!(host = url.host, "malformed session id");
            return Err(Error::ProtocolError);
        };
        {
            let mut state = self.shared.lock();
            state.session = Some(id);
            state.open = true;
        }
        info!(session = id, host = url.host, "HTTP session created");

        if url.protocol == "https" {
            self.configure(id, &format!("AT+MHTTPCFG=\"ssl\",{},1,0", id));
        }
        self.configure(id, &format!("AT+MHTTPCFG=\"encoding\",{},0,0", id));
        self.configure(
            id,
            &format!("AT+MHTTPCFG=\"fragment\",{},{},{}", id, FRAGMENT_SIZE, FRAGMENT_INTERVAL_MS),
        );
        for (key, value) in &self.headers {
            self.configure(id, &format!("AT+MHTTPCFG=\"header\",{},{}: {}", id, key, value));
        }

        // Raw content goes out while hex encoding is still off.
        if method.has_body() && !self.content.is_empty() {
            self.configure(id, &format!("AT+MHTTPCONTENT={},0,{}", id, self.content.len()));
            if let Err(e) = self.modem.command_bytes(&self.content) {
                warn!(session = id, error = %e, "HTTP content rejected");
            }
        }
        self.configure(id, &format!("AT+MHTTPCFG=\"encoding\",{},1,1", id));

        let mut request = String::with_capacity(32 + url.path.len() * 2);
        let _ = write!(request, "AT+MHTTPREQUEST={},{},0,", id, method.code());
        encode_hex_append(&mut request, url.path.as_bytes());
        self.modem
            .command(&request)
            .inspect_err(|_| error!(session = id, method = method.as_str(), "failed to send HTTP request"))?;

        let state = self
            .shared
            .wait_until(self.timeout(), |s| s.headers_received || s.failed || s.fault);
        if state.failed {
            let code = state.error_code;
            drop(state);
            error!(session = id, code, reason = error_description(code), "HTTP request error");
            return Err(Error::HttpRequest(code));
        }
        // A body fault after the headers is reported by `read`.
        if !state.headers_received && state.fault {
            let overflow = state.overflow;
            drop(state);
            error!(session = id, overflow, "HTTP session faulted while waiting for headers");
            return Err(if overflow { Error::Overflow } else { Error::ProtocolError });
        }
        if !state.headers_received {
            drop(state);
            error!(session = id, "timed out waiting for HTTP headers");
            return Err(Error::Timeout);
        }
        let status = state.status_code;
        drop(state);

        if status >= 400 {
            error!(session = id, status, "HTTP request failed");
            return Err(Error::HttpStatus(status));
        }
        info!(session = id, status, method = method.as_str(), "HTTP request succeeded");
        Ok(())
    }

    fn close(&mut self) {
        let (session, needs_delete) = {
            let mut state = self.shared.lock();
            let needs_delete = state.open || state.delete_pending;
            state.open = false;
            state.delete_pending = false;
            state.eof = true;
            (state.session, needs_delete)
        };
        self.shared.cv.notify_all();

        if let (true, Some(id)) = (needs_delete, session) {
            if let Err(e) = self.modem.command(&format!("AT+MHTTPDEL={}", id)) {
                warn!(session = id, error = %e, "failed to delete HTTP session");
            }
            info!(session = id, "HTTP session closed");
        }
    }

    fn status_code(&self) -> u16 {
        self.shared.lock().status_code
    }

    fn response_header(&self, key: &str) -> Option<String> {
        let state = self.shared.lock();
        find_header(&state.response_headers, key).map(str::to_string)
    }

    fn body_length(&self) -> usize {
        self.shared.lock().content_length
    }

    fn body(&mut self) -> Vec<u8> {
        let state = self
            .shared
            .wait_until(self.timeout(), |s| s.eof || s.failed || !s.open);
        if !state.eof && state.open {
            warn!(session = ?state.session, "timed out waiting for the complete HTTP body");
        }
        state.body.clone()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        {
            let state = self.shared.lock();
            if !state.open && !state.eof && state.body.is_empty() {
                return Err(Error::NotOpen);
            }
        }

        let mut state = self
            .shared
            .wait_until(self.timeout(), |s| !s.body.is_empty() || s.eof || s.failed);
        if state.body.is_empty() {
            return if state.overflow {
                Err(Error::Overflow)
            } else if state.fault {
                Err(Error::ProtocolError)
            } else if state.eof {
                Ok(0)
            } else if state.failed {
                Err(Error::HttpRequest(state.error_code))
            } else {
                error!(session = ?state.session, "timed out waiting for HTTP content");
                Err(Error::Timeout)
            };
        }

        let length = buf.len().min(state.body.len());
        buf[..length].copy_from_slice(&state.body[..length]);
        state.body.drain(..length);
        Ok(length)
    }
}

impl<S: SerialPort> Drop for AtHttp<'_, S> {
    fn drop(&mut self) {
        self.close();
        self.modem.unregister_listener(self.listener);
    }
}
