//! Session behavior against an in-memory server.

use async_trait::async_trait;
use ortc_core::{
    Action, Client, ClientConfig, ClientError, ClientEvent, ClusterResolver, ConnectionState,
    EventStream, PermissionHash, Permissions, RestError,
};
use ortc_protocol::multipart::encode_parts;
use ortc_transport::{MemoryListener, MemoryPeer, MemoryTransport};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ClientConfig {
    ClientConfig {
        url: Some("http://ortc.test/server/2.1".into()),
        cluster_url: None,
        ..ClientConfig::default()
    }
}

/// Unwrap the escaping layer of a frame written by the client.
fn command(frame: &str) -> String {
    serde_json::from_str::<String>(frame).expect("client frames are JSON strings")
}

/// Build an array frame carrying the given payload objects.
fn array(payloads: &[Value]) -> String {
    let inner: Vec<String> = payloads.iter().map(Value::to_string).collect();
    format!("a{}", serde_json::to_string(&inner).unwrap())
}

fn validated(permissions: Value) -> String {
    array(&[json!({"op": "ortc-validated", "up": permissions, "set": 0})])
}

fn op(name: &str, channel: &str) -> String {
    array(&[json!({"op": name, "ch": channel})])
}

async fn next_event(events: &mut EventStream) -> ClientEvent {
    timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

async fn next_command(peer: &mut MemoryPeer) -> String {
    let frame = timeout(Duration::from_secs(10), peer.next_frame())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed");
    command(&frame)
}

struct Server {
    transport: MemoryTransport,
    listener: MemoryListener,
}

impl Server {
    fn new() -> Self {
        let (transport, listener) = MemoryTransport::new();
        Self {
            transport,
            listener,
        }
    }

    fn client(&self) -> (Client, EventStream) {
        Client::builder(config())
            .transport(self.transport.clone())
            .build()
    }

    async fn accept(&mut self) -> MemoryPeer {
        timeout(Duration::from_secs(30), self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("transport dropped")
    }

    /// Answer the handshake of a freshly opened connection.
    async fn handshake(&mut self, client: &Client, permissions: Value) -> MemoryPeer {
        let mut peer = self.accept().await;
        assert!(peer.push("o"));

        let validate = next_command(&mut peer).await;
        let session_id = client.session_id().expect("session id is set on connect");
        assert_eq!(validate, format!("validate;K1;T1;;{};;", session_id));

        assert!(peer.push(validated(permissions)));
        peer
    }
}

async fn connected(server: &mut Server, permissions: Value) -> (Client, EventStream, MemoryPeer) {
    let (client, mut events) = server.client();
    client.connect("K1", "T1").await.unwrap();
    let peer = server.handshake(&client, permissions).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Connected);
    assert!(client.is_connected());
    (client, events, peer)
}

fn collector() -> (
    impl Fn(&Client, &str, &str) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<(String, String)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |_: &Client, channel: &str, message: &str| {
        let _ = tx.send((channel.to_string(), message.to_string()));
    };
    (handler, rx)
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_session() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, mut peer) = connected(&mut server, json!({"blue": "HASH1"})).await;

    let (handler, mut messages) = collector();
    client.subscribe("blue", true, handler).unwrap();
    assert!(client.is_subscribing("blue"));
    assert_eq!(next_command(&mut peer).await, "subscribe;K1;T1;blue;HASH1");

    peer.push(op("ortc-subscribed", "blue"));
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Subscribed("blue".into())
    );
    assert!(client.is_subscribed("blue"));

    peer.push(array(&[json!({"ch": "blue", "m": "Ab3dE6gH_1-1_hello"})]));
    assert_eq!(
        messages.recv().await,
        Some(("blue".to_string(), "hello".to_string()))
    );

    client.send("blue", "hi").unwrap();
    let sent = next_command(&mut peer).await;
    assert!(sent.starts_with("send;K1;T1;blue;HASH1;"));
    assert!(sent.ends_with("_1-1_hi"));

    client.unsubscribe("blue").unwrap();
    assert_eq!(next_command(&mut peer).await, "unsubscribe;K1;blue");
    assert!(client.is_subscribed("blue"));

    peer.push(op("ortc-unsubscribed", "blue"));
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Unsubscribed("blue".into())
    );
    assert!(!client.is_subscribed("blue"));

    client.disconnect().unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_connecting_is_rejected() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events) = server.client();

    client.connect("K1", "T1").await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);
    let session_id = client.session_id();

    assert_eq!(
        client.connect("K1", "T1").await,
        Err(ClientError::AlreadyConnecting)
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("Already trying to connect".into())
    );
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert_eq!(client.session_id(), session_id);
    assert_eq!(server.transport.opened(), 1);

    let _peer = server.handshake(&client, Value::Null).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

    assert_eq!(
        client.connect("K1", "T1").await,
        Err(ClientError::AlreadyConnected)
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("Already connected".into())
    );
    assert_eq!(server.transport.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_connect_has_no_side_effect() {
    init_tracing();
    let server = Server::new();
    let (client, mut events) = server.client();

    assert_eq!(
        client.connect("", "T1").await,
        Err(ClientError::Validation("Wrong Application Key".into()))
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("Wrong Application Key".into())
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.session_id().is_none());
    assert_eq!(server.transport.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_host_reverts_to_disconnected() {
    init_tracing();
    let server = Server::new();
    server.transport.set_refuse(true);
    let (client, mut events) = server.client();

    let result = client.connect("K1", "T1").await;
    assert!(matches!(result, Err(ClientError::Connectivity(_))));
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Exception(_)
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connection_closed_before_handshake() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events) = server.client();

    client.connect("K1", "T1").await.unwrap();
    let mut peer = server.accept().await;
    peer.hang_up();

    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("Connection closed before handshake".into())
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(peer.next_frame().await, None);
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_untracked_channel_fails_identically() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, mut peer) = connected(&mut server, Value::Null).await;

    let first = client.unsubscribe("ghost");
    let second = client.unsubscribe("ghost");
    assert_eq!(first, Err(ClientError::NotSubscribed("ghost".into())));
    assert_eq!(first, second);

    let expected = ClientEvent::Exception("Not subscribed to the channel 'ghost'".into());
    assert_eq!(next_event(&mut events).await, expected);
    assert_eq!(next_event(&mut events).await, expected);

    // The next frame on the wire is the one sent after the failures.
    client.send("blue", "marker").unwrap();
    assert!(next_command(&mut peer).await.starts_with("send;K1;T1;blue;;"));
}

#[tokio::test(start_paused = true)]
async fn test_permission_error_sends_no_frame() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, mut peer) = connected(&mut server, json!({"blue": "HASH1"})).await;

    assert_eq!(
        client.subscribe("yellow", false, |_: &Client, _: &str, _: &str| {}),
        Err(ClientError::Permission {
            action: Action::Subscribe,
            channel: "yellow".into()
        })
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("No permissions found to subscribe channel: yellow".into())
    );
    assert!(!client.is_subscribing("yellow"));

    assert!(client.send("yellow", "hi").is_err());
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("No permissions found to send to channel: yellow".into())
    );

    client.send("blue", "marker").unwrap();
    assert!(next_command(&mut peer)
        .await
        .starts_with("send;K1;T1;blue;HASH1;"));
}

#[tokio::test(start_paused = true)]
async fn test_wildcard_permission_grant() {
    init_tracing();
    let mut server = Server::new();
    let (client, _events, mut peer) = connected(&mut server, json!({"news:*": "HASH2"})).await;

    client.subscribe("news:sports", false, |_: &Client, _: &str, _: &str| {}).unwrap();
    assert_eq!(
        next_command(&mut peer).await,
        "subscribe;K1;T1;news:sports;HASH2"
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_subscribe_is_rejected() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, mut peer) = connected(&mut server, Value::Null).await;

    client.subscribe("blue", false, |_: &Client, _: &str, _: &str| {}).unwrap();
    assert_eq!(next_command(&mut peer).await, "subscribe;K1;T1;blue;");

    assert_eq!(
        client.subscribe("blue", false, |_: &Client, _: &str, _: &str| {}),
        Err(ClientError::AlreadySubscribed("blue".into()))
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("Already subscribing to the channel 'blue'".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_multipart_messages() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, mut peer) = connected(&mut server, Value::Null).await;

    let (handler, mut messages) = collector();
    client.subscribe("blue", false, handler).unwrap();
    next_command(&mut peer).await;
    peer.push(op("ortc-subscribed", "blue"));
    next_event(&mut events).await;

    // Inbound: parts arrive in reverse order, in separate frames.
    let message: String = "0123456789".repeat(200);
    let mut parts = encode_parts("Zx9Yw8Vu", &message, 800);
    assert_eq!(parts.len(), 3);
    parts.reverse();
    for part in &parts {
        peer.push(array(&[json!({"ch": "blue", "m": part})]));
    }
    assert_eq!(messages.recv().await, Some(("blue".to_string(), message.clone())));

    // A late copy of a part starts a new buffer and delivers nothing.
    peer.push(array(&[json!({"ch": "blue", "m": parts[0]})]));
    peer.push(array(&[json!({"ch": "blue", "m": "Ab3dE6gH_1-1_after"})]));
    assert_eq!(
        messages.recv().await,
        Some(("blue".to_string(), "after".to_string()))
    );

    // Outbound: one frame per part, all sharing an id.
    client.send("blue", &message).unwrap();
    let mut ids = Vec::new();
    for index in 1..=3 {
        let frame = next_command(&mut peer).await;
        let payload = frame.strip_prefix("send;K1;T1;blue;;").unwrap();
        let (id, rest) = payload.split_once('_').unwrap();
        assert!(rest.starts_with(&format!("{}-3_", index)));
        ids.push(id.to_string());
    }
    assert!(ids.iter().all(|id| id == &ids[0]));
}

#[tokio::test(start_paused = true)]
async fn test_untracked_channel_messages_are_dropped() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, peer) = connected(&mut server, Value::Null).await;

    let (handler, mut messages) = collector();
    client.subscribe("blue", false, handler).unwrap();
    peer.push(op("ortc-subscribed", "blue"));
    next_event(&mut events).await;

    peer.push(array(&[
        json!({"ch": "yellow", "m": "Ab3dE6gH_1-1_lost"}),
        json!({"ch": "blue", "m": "Ab3dE6gH_1-1_kept"}),
    ]));
    assert_eq!(
        messages.recv().await,
        Some(("blue".to_string(), "kept".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_operation_does_not_drop_batched_messages() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, peer) = connected(&mut server, Value::Null).await;

    let (handler, mut messages) = collector();
    client.subscribe("blue", false, handler).unwrap();
    peer.push(op("ortc-subscribed", "blue"));
    next_event(&mut events).await;

    peer.push(array(&[
        json!({"ch": "blue", "m": "Ab3dE6gH_1-1_before"}),
        json!({"op": "ortc-whatever"}),
        json!({"op": "ortc-subscribed"}),
        json!({"ch": "blue", "m": "Ab3dE6gH_1-1_after"}),
    ]));
    assert_eq!(
        messages.recv().await,
        Some(("blue".to_string(), "before".to_string()))
    );
    assert_eq!(
        messages.recv().await,
        Some(("blue".to_string(), "after".to_string()))
    );
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_is_reported() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, peer) = connected(&mut server, Value::Null).await;

    peer.push("not a frame");
    peer.push(array(&[json!({"op": "ortc-error", "ex": "Invalid connection"})]));

    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("Invalid connection".into())
    );
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_transport_once() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, mut peer) = connected(&mut server, Value::Null).await;

    client.subscribe("blue", true, |_: &Client, _: &str, _: &str| {}).unwrap();
    next_command(&mut peer).await;

    client.disconnect().unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert!(!client.is_subscribing("blue"));

    assert_eq!(client.disconnect(), Err(ClientError::NotConnected));
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Exception("Not connected".into())
    );

    assert_eq!(peer.next_frame().await, None);
    assert_eq!(peer.close_count(), 1);
    assert_eq!(client.send("blue", "late"), Err(ClientError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failure_resubscribes_persistent_channels() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, mut peer) = connected(&mut server, Value::Null).await;

    client.subscribe("A", true, |_: &Client, _: &str, _: &str| {}).unwrap();
    client.subscribe("B", false, |_: &Client, _: &str, _: &str| {}).unwrap();
    next_command(&mut peer).await;
    next_command(&mut peer).await;
    peer.push(op("ortc-subscribed", "A"));
    peer.push(op("ortc-subscribed", "B"));
    next_event(&mut events).await;
    next_event(&mut events).await;

    // The server goes silent.
    let event = timeout(Duration::from_secs(60), events.recv()).await.unwrap();
    assert_eq!(event, Some(ClientEvent::Reconnecting));
    assert_eq!(client.state(), ConnectionState::Reconnecting);
    assert!(!client.is_subscribed("A"));
    assert!(!client.is_subscribed("B") && !client.is_subscribing("B"));
    assert_eq!(peer.next_frame().await, None);
    assert_eq!(peer.close_count(), 1);

    let mut fresh = server.handshake(&client, Value::Null).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Reconnected);
    assert_eq!(client.state(), ConnectionState::Connected);

    assert_eq!(next_command(&mut fresh).await, "subscribe;K1;T1;A;");
    assert!(client.is_subscribing("A"));
    assert!(fresh.try_next_frame().is_none());

    fresh.push(op("ortc-subscribed", "A"));
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Subscribed("A".into())
    );
    assert_eq!(server.transport.opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_retries_stay_reconnecting() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, _peer) = connected(&mut server, Value::Null).await;

    server.transport.set_refuse(true);
    let event = timeout(Duration::from_secs(60), events.recv()).await.unwrap();
    assert_eq!(event, Some(ClientEvent::Reconnecting));

    // Each refused attempt is reported and the loop keeps going.
    for _ in 0..2 {
        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::Exception(_)
        ));
        assert_eq!(client.state(), ConnectionState::Reconnecting);
    }

    server.transport.set_refuse(false);
    let _peer = server.handshake(&client, Value::Null).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Reconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_reconnecting() {
    init_tracing();
    let mut server = Server::new();
    let (client, mut events, _peer) = connected(&mut server, Value::Null).await;

    server.transport.set_refuse(true);
    let event = timeout(Duration::from_secs(60), events.recv()).await.unwrap();
    assert_eq!(event, Some(ClientEvent::Reconnecting));

    client.disconnect().unwrap();
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);

    // The reconnection loop is gone: no further attempts are made.
    server.transport.set_refuse(false);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.transport.opened(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_connection_alive() {
    init_tracing();
    let mut server = Server::new();
    let (client, _events, peer) = connected(&mut server, Value::Null).await;

    for _ in 0..60 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(peer.push("h"));
    }
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(peer.close_count(), 0);
}

struct FixedCluster(&'static str);

#[async_trait]
impl ClusterResolver for FixedCluster {
    async fn resolve(&self, _cluster_url: &str, app_key: &str) -> Result<String, RestError> {
        assert_eq!(app_key, "K1");
        Ok(self.0.to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn test_cluster_resolution() {
    init_tracing();
    let mut server = Server::new();
    let config = ClientConfig {
        url: None,
        cluster_url: Some("https://cluster.test/server/ssl/2.1".into()),
        ..ClientConfig::default()
    };
    let (client, _events) = Client::builder(config)
        .transport(server.transport.clone())
        .cluster_resolver(FixedCluster("https://node-7.test:443/"))
        .build();

    client.connect("K1", "T1").await.unwrap();
    let peer = server.accept().await;
    assert!(peer.url().starts_with("wss://node-7.test:443/broadcast/"));
    assert!(peer.url().ends_with("/websocket"));
}

struct Tagged;

impl PermissionHash for Tagged {
    fn hash(&self, _permissions: &Permissions, channel: &str, action: Action) -> Option<String> {
        (channel != "forbidden").then(|| format!("{}:{:?}", channel, action))
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_permission_hash() {
    init_tracing();
    let mut server = Server::new();
    let (client, _events) = Client::builder(config())
        .transport(server.transport.clone())
        .permission_hash(Tagged)
        .build();

    client.connect("K1", "T1").await.unwrap();
    let mut peer = server.handshake(&client, json!({"blue": "ignored"})).await;
    while !client.is_connected() {
        tokio::task::yield_now().await;
    }

    client.subscribe("blue", false, |_: &Client, _: &str, _: &str| {}).unwrap();
    assert_eq!(
        next_command(&mut peer).await,
        "subscribe;K1;T1;blue;blue:Subscribe"
    );
    assert!(client
        .subscribe("forbidden", false, |_: &Client, _: &str, _: &str| {})
        .is_err());
}
