//! Integration tests for end-to-end relay and client behavior.
//!
//! These tests start a real relay on a loopback port and connect real
//! clients, verifying fan-out, echo, ordering, reconnection, and eviction
//! over the full pipeline.

use scrawl_collab::client::{BoardClient, BoardEvent, ClientConfig, ConnectionState};
use scrawl_collab::protocol::Point;
use scrawl_collab::relay::{Relay, RelayConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port, return the port.
async fn start_test_relay() -> u16 {
    let port = free_port().await;
    let relay = Relay::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
    });
    tokio::spawn(async move {
        relay.run().await.unwrap();
    });
    // Give the relay time to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Client config with short timers suited to tests.
fn test_config(port: u16) -> ClientConfig {
    let mut config = ClientConfig::new(format!("ws://127.0.0.1:{port}"));
    config.reconnect_delay = Duration::from_millis(200);
    config
}

/// Wait until the given state change arrives on the event channel.
async fn wait_for_state(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<BoardEvent>,
    wanted: ConnectionState,
) {
    loop {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
            .expect("event channel closed");
        if let BoardEvent::StateChanged(state) = event {
            if state == wanted {
                return;
            }
        }
    }
}

#[tokio::test]
async fn test_relay_accepts_connections() {
    let port = start_test_relay().await;
    let url = format!("ws://127.0.0.1:{port}");

    let result = tokio_tungstenite::connect_async(url.as_str()).await;
    assert!(result.is_ok(), "should connect to relay");
}

#[tokio::test]
async fn test_client_connects() {
    let port = start_test_relay().await;
    let mut client = BoardClient::new(test_config(port));
    let mut events = client.take_event_rx().unwrap();

    client.connect().await;
    wait_for_state(&mut events, ConnectionState::Connecting).await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    assert!(client.is_connected().await);
}

#[tokio::test]
async fn test_chat_fanout_to_all_clients() {
    let port = start_test_relay().await;

    let mut sender = BoardClient::new(test_config(port));
    let mut peer_a = BoardClient::new(test_config(port));
    let mut peer_b = BoardClient::new(test_config(port));

    let mut sender_events = sender.take_event_rx().unwrap();
    let mut a_events = peer_a.take_event_rx().unwrap();
    let mut b_events = peer_b.take_event_rx().unwrap();

    sender.connect().await;
    peer_a.connect().await;
    peer_b.connect().await;
    wait_for_state(&mut sender_events, ConnectionState::Connected).await;
    wait_for_state(&mut a_events, ConnectionState::Connected).await;
    wait_for_state(&mut b_events, ConnectionState::Connected).await;

    sender.send_chat("hi").await.unwrap();

    // Both peers receive the message.
    for events in [&mut a_events, &mut b_events] {
        loop {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("peer should receive the chat message")
                .unwrap();
            if let BoardEvent::ChatAdded(entry) = event {
                assert_eq!(entry.text, "hi");
                assert!(!entry.is_local);
                break;
            }
        }
    }

    assert_eq!(peer_a.chat_log().await.len(), 1);
    assert_eq!(peer_b.chat_log().await.len(), 1);
}

#[tokio::test]
async fn test_sender_receives_own_echo() {
    let port = start_test_relay().await;

    let mut client = BoardClient::new(test_config(port));
    let mut events = client.take_event_rx().unwrap();
    client.connect().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    client
        .send_stroke(vec![Point::new(0.1, 0.2)], "#000000", 4.0)
        .await
        .unwrap();

    // Optimistic local insert plus the relay echo: two StrokeAdded events.
    let mut added = 0;
    while added < 2 {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("sender should see its own echo")
            .unwrap();
        if let BoardEvent::StrokeAdded(_) = event {
            added += 1;
        }
    }

    // The duplicate is acceptable: strokes have no identity and overlay.
    assert_eq!(client.strokes().await.len(), 2);
}

#[tokio::test]
async fn test_stroke_payload_survives_relay() {
    let port = start_test_relay().await;

    let mut sender = BoardClient::new(test_config(port));
    let mut receiver = BoardClient::new(test_config(port));
    let mut sender_events = sender.take_event_rx().unwrap();
    let mut receiver_events = receiver.take_event_rx().unwrap();

    sender.connect().await;
    receiver.connect().await;
    wait_for_state(&mut sender_events, ConnectionState::Connected).await;
    wait_for_state(&mut receiver_events, ConnectionState::Connected).await;

    let points = vec![Point::new(0.25, 0.5), Point::new(0.75, 0.5)];
    sender.send_stroke(points.clone(), "#FF0000", 2.5).await.unwrap();

    loop {
        let event = timeout(Duration::from_secs(2), receiver_events.recv())
            .await
            .expect("receiver should get the stroke")
            .unwrap();
        if let BoardEvent::StrokeAdded(stroke) = event {
            assert_eq!(stroke.points, points);
            assert_eq!(stroke.color, "#FF0000");
            assert_eq!(stroke.stroke_width, 2.5);
            break;
        }
    }
}

#[tokio::test]
async fn test_per_sender_order_is_preserved() {
    let port = start_test_relay().await;

    let mut sender = BoardClient::new(test_config(port));
    let mut receiver = BoardClient::new(test_config(port));
    let mut sender_events = sender.take_event_rx().unwrap();
    let mut receiver_events = receiver.take_event_rx().unwrap();

    sender.connect().await;
    receiver.connect().await;
    wait_for_state(&mut sender_events, ConnectionState::Connected).await;
    wait_for_state(&mut receiver_events, ConnectionState::Connected).await;

    for text in ["one", "two", "three"] {
        sender.send_chat(text).await.unwrap();
    }

    let mut received = Vec::new();
    while received.len() < 3 {
        let event = timeout(Duration::from_secs(2), receiver_events.recv())
            .await
            .expect("receiver should get all three messages")
            .unwrap();
        if let BoardEvent::ChatAdded(entry) = event {
            received.push(entry.text);
        }
    }
    assert_eq!(received, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_reconnects_after_unexpected_close() {
    // A bare server that drops the first connection right after the
    // handshake and keeps the second one open.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut client = BoardClient::new(test_config(port));
    let mut events = client.take_event_rx().unwrap();
    client.connect().await;

    wait_for_state(&mut events, ConnectionState::Connected).await;
    // The server drops us: the client walks Disconnected -> Reconnecting
    // and re-attempts after the fixed delay, exactly once.
    wait_for_state(&mut events, ConnectionState::Disconnected).await;
    wait_for_state(&mut events, ConnectionState::Reconnecting).await;
    wait_for_state(&mut events, ConnectionState::Connecting).await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    assert!(client.is_connected().await);
}

#[tokio::test]
async fn test_manual_disconnect_suppresses_reconnect() {
    let port = start_test_relay().await;

    let mut client = BoardClient::new(test_config(port));
    let mut events = client.take_event_rx().unwrap();
    client.connect().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    client.disconnect().await;
    wait_for_state(&mut events, ConnectionState::Disconnected).await;

    // Well past the reconnect delay, no Connecting transition may appear.
    tokio::time::sleep(Duration::from_millis(600)).await;
    while let Ok(event) = events.try_recv() {
        if let BoardEvent::StateChanged(state) = event {
            assert_ne!(
                state,
                ConnectionState::Connecting,
                "no reconnect after manual disconnect"
            );
        }
    }
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    // An explicit connect() resumes normal operation.
    client.connect().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;
}

#[tokio::test]
async fn test_send_while_disconnected_is_reported() {
    let port = start_test_relay().await;
    let client = BoardClient::new(test_config(port));

    // Never connected: the send is a reported failure, not a silent queue.
    assert!(client.send_chat("hello").await.is_err());
    assert!(client.chat_log().await.is_empty());
}

#[tokio::test]
async fn test_chat_entries_expire_from_snapshot() {
    let port = start_test_relay().await;

    let mut config = test_config(port);
    config.chat_lifetime = Duration::from_millis(100);
    config.evict_interval = Duration::from_millis(25);

    let mut client = BoardClient::new(config);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    client.send_chat("fleeting").await.unwrap();
    assert!(!client.chat_log().await.is_empty());

    // Wait past the lifetime plus a couple of sweep periods.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.chat_log().await.is_empty());

    // The sweep reported the removal so the UI knows to refresh.
    let mut saw_expiry = false;
    while let Ok(event) = events.try_recv() {
        if let BoardEvent::Expired { chat: true, .. } = event {
            saw_expiry = true;
        }
    }
    assert!(saw_expiry, "expected an Expired event for the chat store");
}

#[tokio::test]
async fn test_malformed_frames_are_dropped_not_fatal() {
    let port = start_test_relay().await;

    let mut client = BoardClient::new(test_config(port));
    let mut events = client.take_event_rx().unwrap();
    client.connect().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    // A raw peer injects garbage, then a valid frame, through the relay.
    use futures_util::SinkExt;
    let url = format!("ws://127.0.0.1:{port}");
    let (mut raw_peer, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    raw_peer
        .send(tokio_tungstenite::tungstenite::Message::Text(
            "this is not json".into(),
        ))
        .await
        .unwrap();
    raw_peer
        .send(tokio_tungstenite::tungstenite::Message::Text(
            r#"{"type":"message","roomId":"demoRoom","payload":"{\"text\":\"still alive\"}","timestamp":1000}"#.into(),
        ))
        .await
        .unwrap();

    // The malformed frame is dropped; the valid one still arrives.
    loop {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("valid frame should still arrive")
            .unwrap();
        if let BoardEvent::ChatAdded(entry) = event {
            assert_eq!(entry.text, "still alive");
            break;
        }
    }
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn test_disconnected_peer_does_not_stop_fanout() {
    let port = start_test_relay().await;

    let mut sender = BoardClient::new(test_config(port));
    let mut receiver = BoardClient::new(test_config(port));
    let mut dropper = BoardClient::new(test_config(port));

    let mut sender_events = sender.take_event_rx().unwrap();
    let mut receiver_events = receiver.take_event_rx().unwrap();
    let mut dropper_events = dropper.take_event_rx().unwrap();

    sender.connect().await;
    receiver.connect().await;
    dropper.connect().await;
    wait_for_state(&mut sender_events, ConnectionState::Connected).await;
    wait_for_state(&mut receiver_events, ConnectionState::Connected).await;
    wait_for_state(&mut dropper_events, ConnectionState::Connected).await;

    // One peer goes away; the remaining fan-out must be unaffected.
    dropper.disconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    sender.send_chat("onward").await.unwrap();

    loop {
        let event = timeout(Duration::from_secs(2), receiver_events.recv())
            .await
            .expect("surviving peer should receive the message")
            .unwrap();
        if let BoardEvent::ChatAdded(entry) = event {
            assert_eq!(entry.text, "onward");
            break;
        }
    }
}
