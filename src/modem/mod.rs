//! AT-command engine.
//!
//! [`AtModem`] owns the serial channel to the radio module. It is the only
//! writer on that channel: every adapter goes through [`AtModem::command`],
//! which holds one engine-wide lock from the write until the terminator (or
//! the timeout), so command bytes never interleave.
//!
//! Two background tasks keep the receive side moving:
//!
//! ```text
//! serial driver ──events──▶ event task ──"input available"──▶ receive task
//!                                                               │
//!                              rx accumulator ◀── read_available┘
//!                                    │
//!                                    ▼ parser::next_line
//!           OK / > / ERROR ──▶ completion signal (wakes `command`)
//!           bare line      ──▶ captured response (returned by `query`)
//!           +URC           ──▶ engine state updates, then every listener
//!                              (a `command_capture` answer is also kept)
//! ```
//!
//! Listeners run on the receive task. They must not issue commands.

#![deny(unsafe_code)]

use core::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::network::error::Error;

pub mod hex;
pub mod listener;
pub mod parser;

pub use hex::{decode_hex, decode_hex_append, encode_hex, encode_hex_append};
pub use listener::{ListenerHandle, ListenerRegistry, UrcHandler};
pub use parser::{AtArgument, Line, Urc};

/// Name of the synthetic notification broadcast when the serial driver
/// reports a receive FIFO overflow. It carries no arguments.
pub const FIFO_OVERFLOW: &str = "FIFO_OVERFLOW";

/// Rates tried by [`AtModem::detect_baud_rate`], most likely first.
pub const BAUD_RATES: [u32; 8] = [115_200, 921_600, 460_800, 230_400, 57_600, 38_400, 19_200, 9_600];

/// `CEREG` registration code meaning the network refused us.
pub const REGISTRATION_DENIED: i64 = 3;

const BAUD_PROBE_TIMEOUT: Duration = Duration::from_millis(20);
const BAUD_RETRY_DELAY: Duration = Duration::from_secs(1);
const TASK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOG_TRUNCATE: usize = 64;

/// Events surfaced by the serial driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialEvent {
    /// New bytes are waiting in the driver's receive buffer.
    Data,
    /// A line break was detected.
    Break,
    /// The driver's ring buffer is full.
    BufferFull,
    /// The hardware FIFO overflowed and bytes were lost.
    FifoOverflow,
    /// Anything else the driver wants to report.
    Other,
}

/// The byte-stream contract the engine needs from a serial driver.
///
/// Methods take `&self`: the driver is shared between the caller issuing a
/// command and the two background tasks, so it must synchronise internally
/// (UART drivers usually do). Changing the rate must not discard bytes that
/// are already buffered.
pub trait SerialPort: Send + Sync + 'static {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Queue `data` for transmission, returning how many bytes were taken.
    fn write(&self, data: &[u8]) -> Result<usize, Self::Error>;
    /// Copy up to `buf.len()` already received bytes without blocking.
    fn read_available(&self, buf: &mut [u8]) -> Result<usize, Self::Error>;
    /// Block until the driver has something to report, or `timeout` elapses.
    fn wait_event(&self, timeout: Duration) -> Option<SerialEvent>;
    /// Reconfigure the line rate.
    fn set_baud_rate(&self, baud_rate: u32) -> Result<(), Self::Error>;
}

/// SIM PIN state as reported by `+CPIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinState {
    /// Nothing reported yet.
    #[default]
    Unknown,
    /// `READY`.
    Ready,
    /// Anything else, e.g. `SIM PIN`.
    NotReady,
}

/// Cellular network state, updated only by the receive task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkState {
    /// Address assigned by the data call, once one is active.
    pub ip_address: Option<String>,
    /// A data call is up and the module can open sessions.
    pub network_ready: bool,
    /// Last `+CPIN` state.
    pub pin_state: PinState,
    /// Last `+CEREG` registration code.
    pub registration_code: i64,
    /// Last `+ICCID` value.
    pub iccid: Option<String>,
    /// Operator name from the last `+COPS` answer.
    pub carrier_name: Option<String>,
    /// Last `+CSQ` signal quality.
    pub csq: Option<i64>,
}

#[derive(Default)]
struct Completion {
    done: bool,
    error: bool,
    response: String,
    capture: Option<&'static str>,
    captured: Option<Urc>,
}

impl Completion {
    fn settled(&self) -> bool {
        self.error || (self.done && (self.capture.is_none() || self.captured.is_some()))
    }
}

type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

struct Shared<S> {
    serial: S,
    config: Config,
    debug: AtomicBool,
    running: AtomicBool,
    baud_rate: AtomicU32,
    command_lock: Mutex<()>,
    completion: Mutex<Completion>,
    completion_cv: Condvar,
    input_available: Mutex<bool>,
    input_cv: Condvar,
    rx_buffer: Mutex<Vec<u8>>,
    listeners: ListenerRegistry,
    network: Mutex<NetworkState>,
    network_cv: Condvar,
    on_module_ready: Mutex<Option<ReadyCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded copy of `text` for log lines.
pub(crate) fn truncated(text: &str) -> heapless::String<LOG_TRUNCATE> {
    let mut out = heapless::String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// The command/response engine for one radio module.
///
/// Session adapters borrow the engine; create it once at start-up and keep
/// it alive for as long as any adapter exists. Dropping it stops both
/// background tasks.
pub struct AtModem<S: SerialPort> {
    shared: Arc<Shared<S>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: SerialPort> core::fmt::Debug for AtModem<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AtModem")
            .field("baud_rate", &self.baud_rate())
            .field("listeners", &self.shared.listeners)
            .finish()
    }
}

impl<S: SerialPort> AtModem<S> {
    /// Take ownership of `serial`, apply the configured rate and start the
    /// event and receive tasks.
    pub fn new(serial: S, config: Config) -> Result<Self, Error> {
        serial.set_baud_rate(config.baud_rate).map_err(|e| {
            error!(error = ?e, "failed to configure serial rate");
            Error::WriteError
        })?;

        let shared = Arc::new(Shared {
            serial,
            debug: AtomicBool::new(config.debug),
            running: AtomicBool::new(true),
            baud_rate: AtomicU32::new(config.baud_rate),
            config,
            command_lock: Mutex::new(()),
            completion: Mutex::new(Completion::default()),
            completion_cv: Condvar::new(),
            input_available: Mutex::new(false),
            input_cv: Condvar::new(),
            rx_buffer: Mutex::new(Vec::new()),
            listeners: ListenerRegistry::new(),
            network: Mutex::new(NetworkState::default()),
            network_cv: Condvar::new(),
            on_module_ready: Mutex::new(None),
        });

        let mut modem = Self {
            shared,
            tasks: Vec::with_capacity(2),
        };
        modem.spawn("at_modem_event", Shared::event_task)?;
        modem.spawn("at_modem_receive", Shared::receive_task)?;
        Ok(modem)
    }

    fn spawn(&mut self, name: &str, task: fn(&Shared<S>)) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || task(&shared))
            .map_err(|e| {
                error!(task = name, error = %e, "failed to spawn");
                Error::TaskSpawn
            })?;
        self.tasks.push(handle);
        Ok(())
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Trace every command and received line.
    pub fn set_debug(&self, debug: bool) {
        self.shared.debug.store(debug, Ordering::Relaxed);
    }

    /// Rate the local channel currently runs at.
    pub fn baud_rate(&self) -> u32 {
        self.shared.baud_rate.load(Ordering::Relaxed)
    }

    /// Issue `command` and wait up to the configured command timeout.
    pub fn command(&self, command: &str) -> Result<(), Error> {
        self.command_with_timeout(command, self.shared.config.command_timeout())
    }

    /// Issue `command` and wait up to `timeout` for a terminator.
    ///
    /// Blocks while another command is outstanding. A zero `timeout` sends
    /// the command without waiting and reports [`Error::NoResponse`].
    pub fn command_with_timeout(&self, command: &str, timeout: Duration) -> Result<(), Error> {
        self.shared
            .execute(command.as_bytes(), timeout, None)
            .map(|_| ())
    }

    /// Issue raw bytes as one command line, e.g. a request body after the
    /// module asked for it. Same locking and completion rules as
    /// [`command`](Self::command).
    pub fn command_bytes(&self, data: &[u8]) -> Result<(), Error> {
        self.shared
            .execute(data, self.shared.config.command_timeout(), None)
            .map(|_| ())
    }

    /// Issue a query command and return the bare response line it produced
    /// (empty if the modem answered with `OK` only).
    pub fn query(&self, command: &str) -> Result<String, Error> {
        self.shared
            .execute(command.as_bytes(), self.shared.config.command_timeout(), None)
            .map(|(response, _)| response)
    }

    /// Issue `command` and return the first `+<name>` notification the module
    /// sends for it, whether it arrives before or after the terminator.
    ///
    /// The command lock is held until the notification arrives, so answers
    /// that carry no session id (`+MHTTPCREATE`, `+MQTTSTATE`) cannot be
    /// claimed by another caller. The notification still reaches listeners.
    ///
    /// # Errors
    ///
    /// * [`Error::CommandFailed`] - The module rejected the command
    /// * [`Error::Timeout`] - No terminator, or no `+<name>` notification,
    ///   within `timeout`
    pub fn command_capture(
        &self,
        command: &str,
        name: &'static str,
        timeout: Duration,
    ) -> Result<Urc, Error> {
        match self.shared.execute(command.as_bytes(), timeout, Some(name))? {
            (_, Some(urc)) => Ok(urc),
            (_, None) => Err(Error::Timeout),
        }
    }

    /// Register a notification handler.
    pub fn register_listener<H: UrcHandler + 'static>(&self, handler: H) -> ListenerHandle {
        self.shared.listeners.register(Arc::new(handler))
    }

    /// Remove a handler registered with [`register_listener`](Self::register_listener).
    pub fn unregister_listener(&self, handle: ListenerHandle) {
        self.shared.listeners.unregister(handle);
    }

    /// Called whenever the module reports `+MATREADY` (finished booting).
    pub fn on_module_ready<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        *lock(&self.shared.on_module_ready) = Some(Arc::new(callback));
    }

    /// Probe the module at each of [`BAUD_RATES`] until it answers `AT`.
    ///
    /// There is no overall timeout: a module that is still booting answers
    /// eventually, so the whole list is retried once a second.
    pub fn detect_baud_rate(&self) -> u32 {
        loop {
            info!("detecting baud rate");
            for rate in BAUD_RATES {
                if let Err(e) = self.shared.serial.set_baud_rate(rate) {
                    warn!(rate, error = ?e, "failed to switch serial rate");
                    continue;
                }
                if self.command_with_timeout("AT", BAUD_PROBE_TIMEOUT).is_ok() {
                    info!(rate, "detected baud rate");
                    self.shared.baud_rate.store(rate, Ordering::Relaxed);
                    return rate;
                }
            }
            thread::sleep(BAUD_RETRY_DELAY);
        }
    }

    /// Move both the module and the local channel to `baud_rate`.
    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<(), Error> {
        if self.detect_baud_rate() == baud_rate {
            return Ok(());
        }
        let command = format!("AT+IPR={}", baud_rate);
        if let Err(e) = self.command(&command) {
            error!(baud_rate, "failed to set baud rate");
            return Err(e);
        }
        self.shared.serial.set_baud_rate(baud_rate).map_err(|e| {
            error!(baud_rate, error = ?e, "module switched but local channel did not");
            Error::WriteError
        })?;
        self.shared.baud_rate.store(baud_rate, Ordering::Relaxed);
        info!(baud_rate, "set baud rate");
        Ok(())
    }

    /// Wait until a data call is up.
    ///
    /// Fails fast with [`Error::PinNotReady`] or [`Error::RegistrationDenied`]
    /// as soon as the module reports either. Otherwise polls the data call
    /// state forever; cancel by tearing the engine down.
    pub fn wait_for_network_ready(&self) -> Result<(), Error> {
        info!("waiting for network ready");
        let _ = self.command("AT+CEREG=1");
        let poll = self.shared.config.network_poll();
        loop {
            if self.shared.network_verdict()? {
                return Ok(());
            }
            let _ = self.command("AT+MIPCALL?");
            let state = lock(&self.shared.network);
            let _ = self
                .shared
                .network_cv
                .wait_timeout_while(state, poll, |s| {
                    !s.network_ready
                        && s.pin_state != PinState::NotReady
                        && s.registration_code != REGISTRATION_DENIED
                })
                .unwrap_or_else(PoisonError::into_inner);
            if self.shared.network_verdict()? {
                return Ok(());
            }
        }
    }

    /// Snapshot of the network state.
    pub fn network_state(&self) -> NetworkState {
        lock(&self.shared.network).clone()
    }

    /// Address of the active data call.
    pub fn ip_address(&self) -> Option<String> {
        lock(&self.shared.network).ip_address.clone()
    }

    /// Subscriber identity (`AT+CIMI`).
    pub fn imsi(&self) -> Result<String, Error> {
        self.query("AT+CIMI")
    }

    /// Firmware/module revision (`AT+CGMR`).
    pub fn module_name(&self) -> Result<String, Error> {
        self.query("AT+CGMR")
    }

    /// SIM card identifier.
    pub fn iccid(&self) -> Result<String, Error> {
        self.command("AT+ICCID")?;
        lock(&self.shared.network)
            .iccid
            .clone()
            .ok_or(Error::ProtocolError)
    }

    /// Name of the registered operator.
    pub fn carrier_name(&self) -> Result<String, Error> {
        self.command("AT+COPS?")?;
        lock(&self.shared.network)
            .carrier_name
            .clone()
            .ok_or(Error::ProtocolError)
    }

    /// Signal quality (0..=31, 99 unknown).
    pub fn csq(&self) -> Result<i64, Error> {
        self.command("AT+CSQ")?;
        lock(&self.shared.network).csq.ok_or(Error::ProtocolError)
    }

    /// Reboot the module.
    pub fn reset(&self) -> Result<(), Error> {
        self.command("AT+MREBOOT=0")
    }

    /// Delete any HTTP sessions left over from before a restart.
    pub fn reset_connections(&self) {
        for id in 0..4 {
            let _ = self.command(&format!("AT+MHTTPDEL={}", id));
        }
    }
}

impl<S: SerialPort> Drop for AtModem<S> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.input_cv.notify_all();
        for task in self.tasks.drain(..) {
            if task.join().is_err() {
                error!("modem task panicked");
            }
        }
    }
}

impl<S: SerialPort> Shared<S> {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    fn execute(
        &self,
        command: &[u8],
        timeout: Duration,
        capture: Option<&'static str>,
    ) -> Result<(String, Option<Urc>), Error> {
        let _guard = lock(&self.command_lock);
        let text = String::from_utf8_lossy(&command[..command.len().min(LOG_TRUNCATE * 4)]);
        if self.debug() {
            info!(">> {}", truncated(&text));
        }
        {
            let mut completion = lock(&self.completion);
            completion.done = false;
            completion.error = false;
            completion.response.clear();
            completion.capture = capture;
            completion.captured = None;
        }

        let mut line = Vec::with_capacity(command.len() + 2);
        line.extend_from_slice(command);
        line.extend_from_slice(b"\r\n");
        if let Err(e) = self.write_all(&line) {
            lock(&self.completion).capture = None;
            return Err(e);
        }

        if timeout.is_zero() {
            lock(&self.completion).capture = None;
            return Err(Error::NoResponse);
        }

        let completion = lock(&self.completion);
        let (mut completion, _) = self
            .completion_cv
            .wait_timeout_while(completion, timeout, |c| !c.settled())
            .unwrap_or_else(PoisonError::into_inner);
        completion.capture = None;
        let captured = completion.captured.take();
        if completion.done && (capture.is_none() || captured.is_some()) {
            completion.done = false;
            Ok((core::mem::take(&mut completion.response), captured))
        } else if completion.error {
            completion.error = false;
            error!(command = %truncated(&text), "command error");
            Err(Error::CommandFailed)
        } else {
            debug!(command = %truncated(&text), ?timeout, "command timed out");
            Err(Error::Timeout)
        }
    }

    fn write_all(&self, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            match self.serial.write(data) {
                Ok(0) => {
                    error!("serial write accepted no bytes");
                    return Err(Error::WriteError);
                }
                Ok(n) => data = &data[n.min(data.len())..],
                Err(e) => {
                    error!(error = ?e, "serial write failed");
                    return Err(Error::WriteError);
                }
            }
        }
        Ok(())
    }

    fn event_task(&self) {
        while self.running() {
            match self.serial.wait_event(TASK_POLL_INTERVAL) {
                Some(SerialEvent::Data) => {
                    *lock(&self.input_available) = true;
                    self.input_cv.notify_one();
                }
                Some(SerialEvent::Break) => info!("break"),
                Some(SerialEvent::BufferFull) => error!("buffer full"),
                Some(SerialEvent::FifoOverflow) => {
                    error!("FIFO overflow");
                    self.notify(&Urc::new(FIFO_OVERFLOW, Vec::new()));
                }
                Some(SerialEvent::Other) => warn!("unknown serial event"),
                None => {}
            }
        }
    }

    fn wait_input(&self) -> bool {
        let available = lock(&self.input_available);
        let (mut available, _) = self
            .input_cv
            .wait_timeout_while(available, TASK_POLL_INTERVAL, |a| !*a && self.running())
            .unwrap_or_else(PoisonError::into_inner);
        core::mem::take(&mut *available)
    }

    fn receive_task(&self) {
        let mut chunk = vec![0u8; self.config.rx_chunk_size.max(1)];
        while self.running() {
            if !self.wait_input() {
                continue;
            }
            loop {
                match self.serial.read_available(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => lock(&self.rx_buffer).extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        warn!(error = ?e, "serial read failed");
                        break;
                    }
                }
            }
            // The rx lock is released before each line is handled so that
            // listeners never run under it.
            loop {
                let line = parser::next_line(&mut lock(&self.rx_buffer));
                match line {
                    Some(line) => self.handle_line(line),
                    None => break,
                }
            }
        }
    }

    fn handle_line(&self, line: Line) {
        if self.debug() {
            match &line {
                Line::Urc(urc) => info!("<< {}", truncated(&urc.to_string())),
                other => info!("<< {:?}", other),
            }
        }
        match line {
            Line::Urc(urc) => self.notify(&urc),
            Line::Ok | Line::Prompt => {
                lock(&self.completion).done = true;
                self.completion_cv.notify_all();
            }
            Line::Error => {
                lock(&self.completion).error = true;
                self.completion_cv.notify_all();
            }
            Line::Response(text) => lock(&self.completion).response = text,
        }
    }

    /// Apply engine-level side effects, then broadcast to listeners.
    fn notify(&self, urc: &Urc) {
        let mut module_ready = false;
        match urc.command.as_str() {
            "CME ERROR" => {
                lock(&self.completion).error = true;
                self.completion_cv.notify_all();
                return;
            }
            "MIPCALL" if urc.len() >= 3 => {
                if urc.int(1) == Some(1) {
                    let mut network = lock(&self.network);
                    network.ip_address = urc.str(2).map(str::to_string);
                    network.network_ready = true;
                    self.network_cv.notify_all();
                }
            }
            "ICCID" if !urc.is_empty() => {
                lock(&self.network).iccid = urc.str(0).map(str::to_string);
            }
            "COPS" if urc.len() >= 4 => {
                lock(&self.network).carrier_name = urc.str(2).map(str::to_string);
            }
            "CSQ" if !urc.is_empty() => {
                lock(&self.network).csq = urc.int(0);
            }
            "MATREADY" => {
                lock(&self.network).network_ready = false;
                module_ready = true;
            }
            "CEREG" if !urc.is_empty() => {
                let index = if urc.len() == 1 { 0 } else { 1 };
                if let Some(code) = urc.int(index) {
                    lock(&self.network).registration_code = code;
                    self.network_cv.notify_all();
                }
            }
            "CPIN" if !urc.is_empty() => {
                let ready = urc.str(0) == Some("READY");
                lock(&self.network).pin_state = if ready {
                    PinState::Ready
                } else {
                    PinState::NotReady
                };
                self.network_cv.notify_all();
            }
            _ => {}
        }

        {
            let mut completion = lock(&self.completion);
            if completion.captured.is_none() && completion.capture == Some(urc.command.as_str()) {
                completion.captured = Some(urc.clone());
                drop(completion);
                self.completion_cv.notify_all();
            }
        }

        if module_ready {
            let callback = lock(&self.on_module_ready).clone();
            if let Some(callback) = callback {
                callback();
            }
        }

        self.listeners.dispatch(urc);
    }

    /// `Ok(true)` once the network is up, `Err` for a terminal failure.
    fn network_verdict(&self) -> Result<bool, Error> {
        let network = lock(&self.network);
        if network.network_ready {
            return Ok(true);
        }
        if network.pin_state == PinState::NotReady {
            error!("PIN is not ready");
            return Err(Error::PinNotReady);
        }
        if network.registration_code == REGISTRATION_DENIED {
            error!("registration denied");
            return Err(Error::RegistrationDenied);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_bounds_log_text() {
        let long = "A".repeat(200);
        assert_eq!(truncated(&long).len(), LOG_TRUNCATE);
        assert_eq!(truncated("AT+CSQ").as_str(), "AT+CSQ");
    }

    #[test]
    fn test_network_state_defaults() {
        let state = NetworkState::default();
        assert_eq!(state.pin_state, PinState::Unknown);
        assert!(!state.network_ready);
        assert_eq!(state.ip_address, None);
    }
}
