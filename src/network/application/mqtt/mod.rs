//! MQTT over the module's built-in MQTT client.
//!
//! The module keeps the broker connection; the host drives it with AT
//! commands and receives connection changes and inbound messages as
//! notifications. Payloads travel hex-encoded in both directions.
//!
//! ```text
//! +MQTTSTATE: <state>                                   answers AT+MQTTSTATE
//! +MQTTURC: "conn",<id>,<state>                         0 = connected
//! +MQTTURC: "suback",<id>,...
//! +MQTTURC: "publish",<id>,<msg_id>,"<topic>",<total>,<current>,<hex>
//! ```
//!
//! Large inbound messages arrive in several `publish` notifications and are
//! reassembled before the message callback runs. Only one fragmented message
//! can be in flight per session: the module does not interleave them.
//!
//! ```rust,no_run
//! use libmodem::network::application::mqtt::{AtMqtt, QoS};
//! # use libmodem::modem::{AtModem, SerialPort};
//! # fn demo<S: SerialPort>(modem: &AtModem<S>) -> Result<(), libmodem::Error> {
//! let mut mqtt = AtMqtt::new(modem, 0);
//! mqtt.on_message(|topic, payload| {
//!     println!("{}: {} bytes", topic, payload.len());
//! });
//! mqtt.connect("broker.example.com", 8883, "device-01", "user", "secret")?;
//! mqtt.subscribe("devices/device-01/cmd", QoS::AtLeastOnce)?;
//! mqtt.publish("devices/device-01/status", b"online", QoS::AtMostOnce)?;
//! # Ok(())
//! # }
//! ```

/// MQTT session adapter and supporting types.
pub mod client;

pub use client::{AtMqtt, QoS, SECURE_PORT, state_description};
