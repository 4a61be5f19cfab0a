mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{MockSerial, reply, setup, wait_for};
use libmodem::Error;
use libmodem::modem::encode_hex;
use libmodem::network::application::mqtt::{AtMqtt, QoS};

/// Scripts a module whose session 0 starts in `initial_state` and answers
/// connect attempts with connection state `conn_result`.
fn script_mqtt(serial: &MockSerial, initial_state: u8, conn_result: u8) {
    serial.set_responder(move |line| {
        if line == "AT+MQTTSTATE=0" {
            vec![format!("+MQTTSTATE: {}", initial_state), "OK".to_string()]
        } else if line.starts_with("AT+MQTTCONN=0,") {
            vec!["OK".to_string(), format!("+MQTTURC: \"conn\",0,{}", conn_result)]
        } else if line == "AT+MQTTDISC=0" {
            reply(&["OK", "+MQTTURC: \"conn\",0,2"])
        } else {
            reply(&["OK"])
        }
    });
}

type Inbox = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

fn collect_messages<S: libmodem::SerialPort>(mqtt: &mut AtMqtt<'_, S>) -> Inbox {
    let inbox: Inbox = Arc::default();
    let sink = Arc::clone(&inbox);
    mqtt.on_message(move |topic, payload| {
        sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
    });
    inbox
}

#[test]
fn test_connect_command_sequence() {
    let (modem, serial) = setup();
    script_mqtt(&serial, 3, 0);
    let mut mqtt = AtMqtt::new(&modem, 0);

    assert_eq!(mqtt.connect("broker.example.com", 1883, "dev-1", "user", "pass"), Ok(()));
    assert!(mqtt.connected());
    assert_eq!(
        serial.written(),
        vec![
            "AT+MQTTSTATE=0",
            "AT+MQTTCFG=\"encoding\",0,1,1",
            "AT+MQTTCONN=0,\"broker.example.com\",1883,\"dev-1\",\"user\",\"pass\"",
        ]
    );
}

#[test]
fn test_secure_port_enables_ssl() {
    let (modem, serial) = setup();
    script_mqtt(&serial, 3, 0);
    let mut mqtt = AtMqtt::new(&modem, 0);

    mqtt.connect("broker.example.com", 8883, "dev-1", "", "").unwrap();
    assert!(serial.written().contains(&"AT+MQTTCFG=\"ssl\",0,1".to_string()));
}

#[test]
fn test_existing_connection_is_closed_first() {
    let (modem, serial) = setup();
    script_mqtt(&serial, 1, 0);
    let mut mqtt = AtMqtt::new(&modem, 0);

    assert_eq!(mqtt.connect("broker.example.com", 1883, "dev-1", "", ""), Ok(()));
    let written = serial.written();
    assert_eq!(written[0], "AT+MQTTSTATE=0");
    assert_eq!(written[1], "AT+MQTTDISC=0");
    assert!(written[2..].iter().any(|line| line.starts_with("AT+MQTTCONN=0,")));
}

#[test]
fn test_connect_refused() {
    let (modem, serial) = setup();
    script_mqtt(&serial, 3, 3);
    let mut mqtt = AtMqtt::new(&modem, 0);

    assert_eq!(
        mqtt.connect("broker.example.com", 1883, "dev-1", "user", "wrong"),
        Err(Error::ConnectionRefused(3))
    );
    assert!(!mqtt.connected());
    assert_eq!(mqtt.last_state(), 3);
}

#[test]
fn test_connect_times_out_without_state() {
    let (modem, _serial) = setup();
    let mut mqtt = AtMqtt::new(&modem, 0);
    assert_eq!(
        mqtt.connect("broker.example.com", 1883, "dev-1", "", ""),
        Err(Error::Timeout)
    );
}

#[test]
fn test_operations_require_connection() {
    let (modem, serial) = setup();
    let mut mqtt = AtMqtt::new(&modem, 0);

    assert_eq!(mqtt.publish("t", b"x", QoS::AtMostOnce), Err(Error::NotConnected));
    assert_eq!(mqtt.subscribe("t", QoS::AtMostOnce), Err(Error::NotConnected));
    assert_eq!(mqtt.unsubscribe("t"), Err(Error::NotConnected));
    assert!(serial.written().is_empty());
}

#[test]
fn test_publish_subscribe_unsubscribe_commands() {
    let (modem, serial) = setup();
    script_mqtt(&serial, 3, 0);
    let mut mqtt = AtMqtt::new(&modem, 0);
    mqtt.connect("broker.example.com", 1883, "dev-1", "", "").unwrap();
    serial.clear_written();

    mqtt.publish("dev/status", b"online", QoS::AtLeastOnce).unwrap();
    mqtt.subscribe("dev/cmd", QoS::ExactlyOnce).unwrap();
    mqtt.unsubscribe("dev/cmd").unwrap();
    assert_eq!(
        serial.written(),
        vec![
            format!("AT+MQTTPUB=0,\"dev/status\",1,0,0,6,{}", encode_hex(b"online")),
            "AT+MQTTSUB=0,\"dev/cmd\",2".to_string(),
            "AT+MQTTUNSUB=0,\"dev/cmd\"".to_string(),
        ]
    );
}

#[test]
fn test_complete_message_delivered_immediately() {
    let (modem, serial) = setup();
    let mut mqtt = AtMqtt::new(&modem, 0);
    let inbox = collect_messages(&mut mqtt);

    serial.push_line(&format!(
        "+MQTTURC: \"publish\",0,1,\"dev/cmd\",5,5,{}",
        encode_hex(b"reset")
    ));
    assert!(wait_for(|| inbox.lock().unwrap().len() == 1));
    assert_eq!(inbox.lock().unwrap()[0], ("dev/cmd".to_string(), b"reset".to_vec()));
}

#[test]
fn test_fragmented_message_delivered_once() {
    let (modem, serial) = setup();
    let mut mqtt = AtMqtt::new(&modem, 0);
    let inbox = collect_messages(&mut mqtt);

    let first: Vec<u8> = (0..50).collect();
    let second: Vec<u8> = (50..100).collect();
    serial.push_line(&format!(
        "+MQTTURC: \"publish\",0,2,\"dev/ota\",100,50,{}",
        encode_hex(&first)
    ));
    serial.push_line(&format!(
        "+MQTTURC: \"publish\",0,2,\"dev/ota\",100,100,{}",
        encode_hex(&second)
    ));
    serial.push_line(&format!(
        "+MQTTURC: \"publish\",0,3,\"dev/cmd\",2,2,{}",
        encode_hex(b"ok")
    ));

    assert!(wait_for(|| inbox.lock().unwrap().len() == 2));
    let inbox = inbox.lock().unwrap();
    assert_eq!(inbox[0].0, "dev/ota");
    assert_eq!(inbox[0].1, (0..100).collect::<Vec<u8>>());
    assert_eq!(inbox[1], ("dev/cmd".to_string(), b"ok".to_vec()));
}

#[test]
fn test_broker_drop_blocks_publish() {
    let (modem, serial) = setup();
    script_mqtt(&serial, 3, 0);
    let mut mqtt = AtMqtt::new(&modem, 0);
    mqtt.connect("broker.example.com", 1883, "dev-1", "", "").unwrap();

    serial.push_line("+MQTTURC: \"conn\",0,5");
    assert!(wait_for(|| !mqtt.connected()));
    assert_eq!(mqtt.publish("t", b"x", QoS::AtMostOnce), Err(Error::NotConnected));
}

#[test]
fn test_concurrent_connects_read_their_own_state() {
    let (modem, serial) = setup();
    serial.set_responder(|line| {
        if line == "AT+MQTTSTATE=0" {
            thread::sleep(Duration::from_millis(50));
            reply(&["+MQTTSTATE: 1", "OK"])
        } else if line == "AT+MQTTSTATE=1" {
            reply(&["+MQTTSTATE: 3", "OK"])
        } else if line == "AT+MQTTDISC=0" {
            reply(&["OK", "+MQTTURC: \"conn\",0,2"])
        } else if let Some(rest) = line.strip_prefix("AT+MQTTCONN=") {
            let id = rest.split(',').next().unwrap().to_string();
            vec!["OK".to_string(), format!("+MQTTURC: \"conn\",{},0", id)]
        } else {
            reply(&["OK"])
        }
    });

    let modem = &modem;
    let connect = move |id: u8| {
        move || AtMqtt::new(modem, id).connect("broker.example.com", 1883, "dev", "", "")
    };
    let (first, second) = thread::scope(|s| {
        let first = s.spawn(connect(0));
        let second = s.spawn(connect(1));
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert_eq!(serial.written_with_prefix("AT+MQTTDISC="), vec!["AT+MQTTDISC=0".to_string()]);
}
