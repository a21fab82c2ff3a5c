//! End-to-end session over a real websocket on localhost

use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use libssapctl::{DialConfig, SessionError, SessionState, Tv, WsConnector};
use serde_json::{Value, json};
use tungstenite::Message;

fn plain() -> WsConnector {
    WsConnector::new(DialConfig {
        secure: false,
        ..DialConfig::default()
    })
}

fn read_json(ws: &mut tungstenite::WebSocket<std::net::TcpStream>) -> Value {
    loop {
        match ws.read().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

fn send_json(ws: &mut tungstenite::WebSocket<std::net::TcpStream>, value: Value) {
    ws.send(Message::text(value.to_string())).unwrap();
}

#[test]
fn prompt_pairing_command_and_buttons() {
    let control = TcpListener::bind("127.0.0.1:0").unwrap();
    let input = TcpListener::bind("127.0.0.1:0").unwrap();
    let control_port = control.local_addr().unwrap().port();
    let input_url = format!("ws://127.0.0.1:{}/input", input.local_addr().unwrap().port());

    let (buttons_tx, buttons_rx) = mpsc::channel();
    let input_server = thread::spawn(move || {
        let (stream, _) = input.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        while let Ok(msg) = ws.read() {
            if let Message::Text(text) = msg {
                let _ = buttons_tx.send(text);
            }
        }
    });

    let socket_path = input_url.clone();
    let control_server = thread::spawn(move || {
        let (stream, _) = control.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        send_json(&mut ws, json!({"type": "hello", "payload": {"deviceOS": "webOS"}}));

        let register = read_json(&mut ws);
        assert_eq!(register["type"], "register");
        let id = register["id"].clone();
        send_json(&mut ws, json!({"id": id, "type": "response", "payload": {"pairingType": "PROMPT"}}));
        thread::sleep(Duration::from_millis(100));
        send_json(&mut ws, json!({"id": id, "type": "registered", "payload": {"client-key": "live-key"}}));

        let volume = read_json(&mut ws);
        assert_eq!(volume["uri"], "ssap://audio/getVolume");
        send_json(&mut ws, json!({"id": volume["id"], "type": "response", "payload": {"returnValue": true, "volume": 15, "muted": false}}));

        let pointer = read_json(&mut ws);
        assert_eq!(
            pointer["uri"],
            "ssap://com.webos.service.networkinput/getPointerInputSocket"
        );
        send_json(&mut ws, json!({"id": pointer["id"], "type": "response", "payload": {"returnValue": true, "socketPath": socket_path}}));

        // Wait for the client to hang up
        while ws.read().is_ok() {}
    });

    let tv = Tv::connect(&format!("ws://127.0.0.1:{control_port}/"), plain()).unwrap();
    assert_eq!(tv.register_with_prompt().unwrap(), "live-key");
    assert_eq!(tv.state(), SessionState::Registered);

    assert_eq!(tv.volume().unwrap().volume, 15);

    tv.key_up().unwrap();
    tv.key_enter().unwrap();
    let wait = Duration::from_secs(5);
    assert_eq!(buttons_rx.recv_timeout(wait).unwrap(), "type:button\nname:UP\n\n");
    assert_eq!(buttons_rx.recv_timeout(wait).unwrap(), "type:button\nname:ENTER\n\n");

    tv.close().unwrap();
    assert_eq!(tv.state(), SessionState::Closed);
    control_server.join().unwrap();
    input_server.join().unwrap();
}

#[test]
fn server_close_fails_pending_command() {
    let control = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = control.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = control.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        let register = read_json(&mut ws);
        send_json(&mut ws, json!({"id": register["id"], "type": "registered", "payload": {"client-key": "k"}}));

        // Swallow the command and close instead of answering
        let _ = read_json(&mut ws);
        ws.close(None).unwrap();
        while ws.read().is_ok() {}
    });

    let tv = Tv::connect(&format!("ws://127.0.0.1:{port}/"), plain()).unwrap();
    tv.register_with_key("k").unwrap();

    let err = tv.command("ssap://system/turnOff", None).unwrap_err();
    assert!(matches!(err, SessionError::ConnectionClosed));

    let deadline = Instant::now() + Duration::from_secs(5);
    while tv.state() != SessionState::Closed {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(10));
    }
    server.join().unwrap();
}

#[test]
fn connection_refused_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = Tv::connect(&format!("ws://127.0.0.1:{port}/"), plain())
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Transport(_)));
}
