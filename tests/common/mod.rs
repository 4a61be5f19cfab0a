//! Scripted serial port standing in for the cellular module.
//!
//! Every complete command line the engine writes is recorded and handed to a
//! responder, whose reply lines are queued for the engine to read as if the
//! module had sent them. Tests can also inject unsolicited lines and driver
//! events at any time.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use libmodem::modem::{SerialEvent, SerialPort};
use libmodem::{AtModem, Config};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct MockState {
    rx: VecDeque<u8>,
    events: VecDeque<SerialEvent>,
    partial: Vec<u8>,
    written: Vec<String>,
    responder: Responder,
    baud_rate: u32,
    module_baud: u32,
}

struct MockInner {
    state: Mutex<MockState>,
    cv: Condvar,
}

/// Cloneable handle; the engine owns one clone, the test keeps another.
#[derive(Clone)]
pub struct MockSerial {
    inner: Arc<MockInner>,
}

/// Reply lines for a responder.
pub fn reply(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

impl MockSerial {
    /// A module that answers `OK` to everything at 115200 baud.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState {
                    rx: VecDeque::new(),
                    events: VecDeque::new(),
                    partial: Vec::new(),
                    written: Vec::new(),
                    responder: Box::new(|_: &str| reply(&["OK"])),
                    baud_rate: 115_200,
                    module_baud: 115_200,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.state.lock().unwrap()
    }

    /// Replace the command responder.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.lock().responder = Box::new(responder);
    }

    /// Rate the simulated module listens at; commands sent at any other
    /// rate go unanswered.
    pub fn set_module_baud(&self, rate: u32) {
        self.lock().module_baud = rate;
    }

    /// Queue one line from the module, CRLF appended.
    pub fn push_line(&self, line: &str) {
        let mut state = self.lock();
        state.rx.extend(line.as_bytes());
        state.rx.extend(b"\r\n");
        state.events.push_back(SerialEvent::Data);
        drop(state);
        self.inner.cv.notify_all();
    }

    /// Queue a driver event.
    pub fn push_event(&self, event: SerialEvent) {
        self.lock().events.push_back(event);
        self.inner.cv.notify_all();
    }

    /// Command lines written so far, without line terminators.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Written lines starting with `prefix`.
    pub fn written_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.written()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    pub fn current_baud(&self) -> u32 {
        self.lock().baud_rate
    }
}

impl SerialPort for MockSerial {
    type Error = ();

    fn write(&self, data: &[u8]) -> Result<usize, ()> {
        let mut state = self.lock();
        state.partial.extend_from_slice(data);
        while let Some(end) = state.partial.windows(2).position(|w| w == b"\r\n") {
            let line = String::from_utf8_lossy(&state.partial[..end]).into_owned();
            state.partial.drain(..end + 2);
            state.written.push(line.clone());
            if state.baud_rate != state.module_baud {
                continue;
            }
            let replies = (state.responder)(&line);
            for reply in replies {
                state.rx.extend(reply.as_bytes());
                state.rx.extend(b"\r\n");
                state.events.push_back(SerialEvent::Data);
            }
        }
        drop(state);
        self.inner.cv.notify_all();
        Ok(data.len())
    }

    fn read_available(&self, buf: &mut [u8]) -> Result<usize, ()> {
        let mut state = self.lock();
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn wait_event(&self, timeout: Duration) -> Option<SerialEvent> {
        let state = self.lock();
        let (mut state, _) = self
            .inner
            .cv
            .wait_timeout_while(state, timeout, |s| s.events.is_empty())
            .unwrap();
        state.events.pop_front()
    }

    fn set_baud_rate(&self, baud_rate: u32) -> Result<(), ()> {
        self.lock().baud_rate = baud_rate;
        Ok(())
    }
}

/// Timeouts short enough for tests.
pub fn test_config() -> Config {
    Config {
        command_timeout_ms: 500,
        http_timeout_ms: 1_000,
        mqtt_timeout_ms: 1_000,
        socket_timeout_ms: 500,
        network_poll_ms: 50,
        ..Config::default()
    }
}

/// Engine over a fresh mock, plus the test's handle on the mock.
pub fn setup() -> (AtModem<MockSerial>, MockSerial) {
    let serial = MockSerial::new();
    let modem = AtModem::new(serial.clone(), test_config()).unwrap();
    (modem, serial)
}

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
