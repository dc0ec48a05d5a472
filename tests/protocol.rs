//! WebSocket transport integration tests
//!
//! Runs the real transport against a loopback tungstenite server: hello
//! handshake, handshake timeout, frame routing, and channel close.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use chime::audio::AudioParams;
use chime::config::ServerConfig;
use chime::protocol::ReconnectPolicy;
use chime::{ProtocolEvent, Transport, WebSocketTransport};

/// Bind a loopback listener and return it with its ws:// URL.
async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// One-connection server: optionally answers the client hello, then sends
/// the scripted frames, then forwards everything it receives.
fn spawn_server(
    listener: TcpListener,
    reply_hello: bool,
    after_hello: Vec<Message>,
) -> mpsc::Receiver<Message> {
    let (server_tx, server_rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("ws accept");

        while let Some(Ok(message)) = ws.next().await {
            let is_hello = matches!(
                &message,
                Message::Text(text) if text.contains("\"hello\"")
            );

            let _ = server_tx.send(message).await;

            if is_hello {
                if reply_hello {
                    let hello = json!({
                        "type": "hello",
                        "transport": "websocket",
                        "session_id": "s-test-1",
                    });
                    ws.send(Message::Text(hello.to_string())).await.expect("send hello");

                    for frame in after_hello.clone() {
                        ws.send(frame).await.expect("send scripted frame");
                    }
                }
            }
        }
    });

    server_rx
}

fn transport_for(url: &str) -> (WebSocketTransport, mpsc::Receiver<ProtocolEvent>) {
    let config = ServerConfig {
        websocket_url: url.to_string(),
        access_token: "test-token".to_string(),
        device_id: "aa:bb:cc:dd:ee:ff".to_string(),
        client_id: "client-1".to_string(),
    };

    let (transport, events) =
        WebSocketTransport::new(config, AudioParams::default(), ReconnectPolicy::default());
    (
        transport.with_hello_timeout(Duration::from_millis(500)),
        events,
    )
}

async fn next_event(events: &mut mpsc::Receiver<ProtocolEvent>) -> Option<ProtocolEvent> {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn connect_completes_hello_handshake() {
    let (listener, url) = bind().await;
    let mut server_rx = spawn_server(listener, true, vec![]);
    let (transport, mut events) = transport_for(&url);

    assert!(transport.connect().await);
    assert!(transport.is_audio_channel_opened());
    assert_eq!(transport.session_id(), "s-test-1");

    // The client hello carried the negotiated audio parameters
    let client_hello = tokio::time::timeout(Duration::from_secs(2), server_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let Message::Text(text) = client_hello else {
        panic!("expected text hello");
    };
    let hello: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["version"], 1);
    assert_eq!(hello["audio_params"]["format"], "opus");
    assert_eq!(hello["audio_params"]["sample_rate"], 16_000);

    assert!(matches!(
        next_event(&mut events).await,
        Some(ProtocolEvent::ChannelOpened)
    ));

    let state = transport.connection_state();
    assert!(state.connected);
    assert_eq!(state.reconnect_attempts, 0);
}

#[tokio::test]
async fn hello_timeout_fails_connect_with_one_error() {
    let (listener, url) = bind().await;
    let _server_rx = spawn_server(listener, false, vec![]);
    let (transport, mut events) = transport_for(&url);

    assert!(!transport.connect().await);
    assert!(!transport.is_audio_channel_opened());

    // Exactly one network-error notification, and no channel-opened
    let mut network_errors = 0;
    let mut channel_opened = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), events.recv()).await
    {
        match event {
            ProtocolEvent::NetworkError(_) => network_errors += 1,
            ProtocolEvent::ChannelOpened => channel_opened += 1,
            _ => {}
        }
    }
    assert_eq!(network_errors, 1);
    assert_eq!(channel_opened, 0);
}

#[tokio::test]
async fn connect_to_unreachable_server_fails() {
    // Nothing is listening on this port
    let (transport, mut events) = transport_for("ws://127.0.0.1:1/");

    assert!(!transport.connect().await);
    assert!(matches!(
        next_event(&mut events).await,
        Some(ProtocolEvent::NetworkError(_))
    ));
}

#[tokio::test]
async fn binary_frames_surface_as_audio() {
    let (listener, url) = bind().await;
    let _server_rx = spawn_server(listener, true, vec![Message::Binary(vec![1, 2, 3, 4])]);
    let (transport, mut events) = transport_for(&url);

    assert!(transport.connect().await);

    let mut got_audio = None;
    for _ in 0..4 {
        match next_event(&mut events).await {
            Some(ProtocolEvent::IncomingAudio(data)) => {
                got_audio = Some(data);
                break;
            }
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(got_audio, Some(vec![1, 2, 3, 4]));
}

#[tokio::test]
async fn control_frames_surface_as_json() {
    let (listener, url) = bind().await;
    let tts = json!({ "type": "tts", "state": "start" });
    let _server_rx = spawn_server(listener, true, vec![Message::Text(tts.to_string())]);
    let (transport, mut events) = transport_for(&url);

    assert!(transport.connect().await);

    let mut got_json = None;
    for _ in 0..4 {
        match next_event(&mut events).await {
            Some(ProtocolEvent::IncomingJson(value)) => {
                got_json = Some(value);
                break;
            }
            Some(_) => {}
            None => break,
        }
    }
    let value = got_json.expect("tts control message");
    assert_eq!(value["type"], "tts");
    assert_eq!(value["state"], "start");
}

#[tokio::test]
async fn sent_audio_reaches_the_server_as_binary() {
    let (listener, url) = bind().await;
    let mut server_rx = spawn_server(listener, true, vec![]);
    let (transport, _events) = transport_for(&url);

    assert!(transport.connect().await);

    // First server-side message is the client hello; skip it
    let _hello = server_rx.recv().await.unwrap();

    transport.send_audio(vec![9, 9, 9]).await;

    let received = tokio::time::timeout(Duration::from_secs(2), server_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, Message::Binary(vec![9, 9, 9]));
}

#[tokio::test]
async fn sends_before_connect_are_noops() {
    let (transport, _events) = transport_for("ws://127.0.0.1:1/");

    // Must not panic, hang, or try to connect
    transport.send_text("{}".to_string()).await;
    transport.send_audio(vec![0]).await;
    assert!(!transport.is_audio_channel_opened());
}

#[tokio::test]
async fn close_audio_channel_reports_closed() {
    let (listener, url) = bind().await;
    let _server_rx = spawn_server(listener, true, vec![]);
    let (transport, mut events) = transport_for(&url);

    assert!(transport.connect().await);
    assert!(matches!(
        next_event(&mut events).await,
        Some(ProtocolEvent::ChannelOpened)
    ));

    transport.close_audio_channel().await;
    assert!(!transport.is_audio_channel_opened());

    assert!(matches!(
        next_event(&mut events).await,
        Some(ProtocolEvent::ChannelClosed)
    ));
}

#[tokio::test]
async fn open_audio_channel_is_idempotent_when_open() {
    let (listener, url) = bind().await;
    let mut server_rx = spawn_server(listener, true, vec![]);
    let (transport, _events) = transport_for(&url);

    assert!(transport.open_audio_channel().await);
    let _hello = server_rx.recv().await.unwrap();

    // Already open: no second handshake
    assert!(transport.open_audio_channel().await);
    let second =
        tokio::time::timeout(Duration::from_millis(300), server_rx.recv()).await;
    assert!(second.is_err(), "no further client hello expected");
}
