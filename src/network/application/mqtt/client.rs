use core::fmt::Write as _;
use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::modem::{
    AtModem, FIFO_OVERFLOW, ListenerHandle, SerialPort, Urc, decode_hex, decode_hex_append, encode_hex_append,
};
use crate::network::error::Error;

/// Broker port that selects a TLS connection.
pub const SECURE_PORT: u16 = 8883;

/// `+MQTTSTATE` value for a session with no broker connection.
const STATE_DISCONNECTED: i64 = 3;

/// Quality of Service levels for MQTT messages.
///
/// QoS defines the guarantee of delivery for a specific message. Higher
/// levels give stronger guarantees at the cost of more broker round trips;
/// the module handles the acknowledgement flow itself.
///
/// ```rust
/// use libmodem::network::application::mqtt::QoS;
///
/// assert_eq!(QoS::AtMostOnce as u8, 0);
/// assert_eq!(QoS::AtLeastOnce as u8, 1);
/// assert_eq!(QoS::ExactlyOnce as u8, 2);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum QoS {
    /// **QoS 0**: At most once delivery. Message loss can occur.
    #[default]
    AtMostOnce = 0,
    /// **QoS 1**: At least once delivery. Duplicates can occur.
    AtLeastOnce = 1,
    /// **QoS 2**: Exactly once delivery.
    ExactlyOnce = 2,
}

/// Text for a broker connection state code.
pub fn state_description(code: i32) -> &'static str {
    match code {
        0 => "connected",
        1 => "reconnecting",
        2 => "disconnected: closed by user",
        3 => "disconnected: connection refused (protocol version, client id, username or password)",
        4 => "disconnected: closed by server",
        5 => "disconnected: ping timeout",
        6 => "disconnected: network error",
        255 => "disconnected: unknown error",
        _ => "unknown state",
    }
}

type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[derive(Debug, Default)]
struct MqttState {
    connected: bool,
    connected_event: bool,
    disconnected_event: bool,
    last_state: i32,
    pending: Vec<u8>,
}

impl MqttState {
    fn mark_disconnected(&mut self) {
        self.connected = false;
        self.disconnected_event = true;
    }
}

struct MqttShared {
    id: i64,
    state: Mutex<MqttState>,
    cv: Condvar,
    on_message: Mutex<Option<MessageCallback>>,
}

impl MqttShared {
    fn lock(&self) -> MutexGuard<'_, MqttState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until<F>(&self, timeout: Duration, mut ready: F) -> MutexGuard<'_, MqttState>
    where
        F: FnMut(&MqttState) -> bool,
    {
        let state = self.lock();
        self.cv
            .wait_timeout_while(state, timeout, |s| !ready(s))
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    fn handle(&self, urc: &Urc) {
        match urc.command.as_str() {
            "MQTTURC" if urc.len() >= 2 && urc.int(1) == Some(self.id) => match urc.str(0) {
                Some("conn") => self.on_connection_state(urc),
                Some("suback") => debug!(session = self.id, "subscription acknowledged"),
                Some("publish") if urc.len() >= 7 => self.on_publish(urc),
                other => info!(session = self.id, kind = ?other, "unhandled MQTT notification"),
            },
            FIFO_OVERFLOW => {
                let mut state = self.lock();
                state.pending.clear();
                state.mark_disconnected();
                drop(state);
                self.cv.notify_all();
            }
            _ => {}
        }
    }

    fn on_connection_state(&self, urc: &Urc) {
        let mut state = self.lock();
        match urc.int(2) {
            Some(code) => {
                state.last_state = code as i32;
                if code == 0 {
                    state.connected = true;
                    state.connected_event = true;
                } else {
                    state.mark_disconnected();
                }
                info!(session = self.id, state = state_description(code as i32), "MQTT connection state");
            }
            None => {
                warn!(session = self.id, "malformed connection notification");
                state.mark_disconnected();
            }
        }
        drop(state);
        self.cv.notify_all();
    }

    fn on_publish(&self, urc: &Urc) {
        // "publish",<id>,<msg_id>,"<topic>",<total>,<current>,<hex>
        let topic = urc.str(3).unwrap_or_default();
        let total = urc.int(4).and_then(|v| usize::try_from(v).ok());
        let current = urc.int(5).and_then(|v| usize::try_from(v).ok());
        let (Some(total), Some(current), Some(data)) = (total, current, urc.str(6)) else {
            warn!(session = self.id, topic, "malformed publish notification");
            return;
        };

        let message = {
            let mut state = self.lock();
            if current == total && state.pending.is_empty() {
                Some(decode_hex(data))
            } else {
                decode_hex_append(&mut state.pending, data.as_bytes());
                if state.pending.len() >= total {
                    Some(core::mem::take(&mut state.pending))
                } else {
                    None
                }
            }
        };

        let Some(payload) = message else {
            return;
        };
        let callback = self
            .on_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => callback(topic, &payload),
            None => debug!(session = self.id, topic, len = payload.len(), "message dropped, no callback"),
        }
    }
}

/// MQTT client backed by the module's MQTT stack.
///
/// Each adapter owns one of the module's numbered MQTT sessions. Inbound
/// messages are delivered to the [`on_message`](AtMqtt::on_message) callback
/// on the modem's receive task, so the callback must not issue commands.
pub struct AtMqtt<'m, S: SerialPort> {
    modem: &'m AtModem<S>,
    shared: Arc<MqttShared>,
    listener: ListenerHandle,
}

impl<S: SerialPort> core::fmt::Debug for AtMqtt<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("AtMqtt")
            .field("id", &self.shared.id)
            .field("connected", &state.connected)
            .field("last_state", &state.last_state)
            .finish()
    }
}

impl<'m, S: SerialPort> AtMqtt<'m, S> {
    /// Create an adapter for MQTT session `id`.
    pub fn new(modem: &'m AtModem<S>, id: u8) -> Self {
        let shared = Arc::new(MqttShared {
            id: id.into(),
            state: Mutex::new(MqttState::default()),
            cv: Condvar::new(),
            on_message: Mutex::new(None),
        });
        let listener_state = Arc::clone(&shared);
        let listener = modem.register_listener(move |urc: &Urc| listener_state.handle(urc));
        Self {
            modem,
            shared,
            listener,
        }
    }

    /// Session id this adapter owns.
    pub fn id(&self) -> i64 {
        self.shared.id
    }

    /// Whether the broker connection is up, as last reported by the module.
    pub fn connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Last connection state code, see [`state_description`].
    pub fn last_state(&self) -> i32 {
        self.shared.lock().last_state
    }

    /// Install the callback for inbound messages, replacing any previous one.
    ///
    /// The callback receives the topic and the fully reassembled payload.
    pub fn on_message<F>(&mut self, callback: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        *self
            .shared
            .on_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    fn timeout(&self) -> Duration {
        self.modem.config().mqtt_timeout()
    }

    /// Connect the session to a broker.
    ///
    /// An existing connection on the same session is closed first. Port
    /// [`SECURE_PORT`] selects TLS.
    ///
    /// # Errors
    ///
    /// * [`Error::Timeout`] - The module did not report the session state or
    ///   the connection result in time
    /// * [`Error::CommandFailed`] - The module rejected a configuration or
    ///   connect command
    /// * [`Error::ConnectionRefused`] - The broker connection ended in a
    ///   non-zero state, see [`state_description`]
    pub fn connect(
        &mut self,
        broker: &str,
        port: u16,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        let id = self.shared.id;
        let answer = self
            .modem
            .command_capture(&format!("AT+MQTTSTATE={}", id), "MQTTSTATE", self.timeout())
            .inspect_err(|e| error!(session = id, error = %e, "failed to query MQTT session state"))?;
        let connected = answer.int(0) != Some(STATE_DISCONNECTED);
        self.shared.lock().connected = connected;

        if connected {
            self.shared.lock().disconnected_event = false;
            self.disconnect();
            let disconnected = self
                .shared
                .wait_until(self.timeout(), |s| s.disconnected_event)
                .disconnected_event;
            if !disconnected {
                error!(session = id, "failed to close previous MQTT connection");
                return Err(Error::Timeout);
            }
        }

        if port == SECURE_PORT {
            self.modem
                .command(&format!("AT+MQTTCFG=\"ssl\",{},1", id))
                .inspect_err(|_| error!(session = id, "failed to enable MQTT TLS"))?;
        }
        self.modem
            .command(&format!("AT+MQTTCFG=\"encoding\",{},1,1", id))
            .inspect_err(|_| error!(session = id, "failed to set MQTT hex encoding"))?;

        {
            let mut state = self.shared.lock();
            state.connected_event = false;
            state.disconnected_event = false;
            state.pending.clear();
        }
        self.modem
            .command(&format!(
                "AT+MQTTCONN={},\"{}\",{},\"{}\",\"{}\",\"{}\"",
                id, broker, port, client_id, username, password
            ))
            .inspect_err(|_| error!(session = id, broker, port, "failed to start MQTT connection"))?;

        let state = self
            .shared
            .wait_until(self.timeout(), |s| s.connected_event || s.disconnected_event);
        if !state.connected_event {
            let refused = state.disconnected_event;
            let code = state.last_state;
            drop(state);
            if refused {
                error!(session = id, broker, port, code, reason = state_description(code), "MQTT connection refused");
                return Err(Error::ConnectionRefused(code));
            }
            error!(session = id, broker, port, "timed out connecting to MQTT broker");
            return Err(Error::Timeout);
        }
        drop(state);
        info!(session = id, broker, port, client_id, "MQTT connected");
        Ok(())
    }

    /// Ask the module to close the broker connection. Best-effort; the
    /// connected flag drops when the module reports the new state.
    pub fn disconnect(&mut self) {
        if !self.connected() {
            return;
        }
        if let Err(e) = self.modem.command(&format!("AT+MQTTDISC={}", self.shared.id)) {
            warn!(session = self.shared.id, error = %e, "failed to disconnect MQTT session");
        }
    }

    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] - The session has no broker connection
    /// * [`Error::CommandFailed`] / [`Error::Timeout`] - The module rejected
    ///   or did not answer the publish command
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Error> {
        if !self.connected() {
            return Err(Error::NotConnected);
        }
        let mut command = String::with_capacity(48 + topic.len() + payload.len() * 2);
        let _ = write!(
            command,
            "AT+MQTTPUB={},\"{}\",{},0,0,{},",
            self.shared.id,
            topic,
            qos as u8,
            payload.len()
        );
        encode_hex_append(&mut command, payload);
        self.modem.command(&command)
    }

    /// Subscribe to a topic filter.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error> {
        if !self.connected() {
            return Err(Error::NotConnected);
        }
        self.modem
            .command(&format!("AT+MQTTSUB={},\"{}\",{}", self.shared.id, topic, qos as u8))
    }

    /// Remove a subscription.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), Error> {
        if !self.connected() {
            return Err(Error::NotConnected);
        }
        self.modem
            .command(&format!("AT+MQTTUNSUB={},\"{}\"", self.shared.id, topic))
    }
}

impl<S: SerialPort> Drop for AtMqtt<'_, S> {
    fn drop(&mut self) {
        self.modem.unregister_listener(self.listener);
    }
}
