//! End-to-end tests driving the server over real WebSocket connections.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use relay_hub::config::{HubConfig, ServerConfig, Settings};
use relay_hub::hub::FanoutTask;
use relay_hub::server::{create_app, AppState};
use relay_hub::websocket::OriginPolicy;

const TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_TIMEOUT: Duration = Duration::from_millis(200);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_settings(allowed_origins: Vec<String>) -> Settings {
    Settings {
        server: ServerConfig {
            allowed_origins,
            ..ServerConfig::default()
        },
        hub: HubConfig::default(),
    }
}

/// Boot a server on an ephemeral port and return its address.
async fn boot_server(settings: Settings) -> SocketAddr {
    let (state, fanout) = AppState::new(settings);
    serve_app(state, fanout).await
}

async fn serve_app(state: AppState, fanout: FanoutTask) -> SocketAddr {
    tokio::spawn(fanout.run());
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

async fn ws_connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(format!("ws://{addr}/ws")))
        .await
        .expect("timed out connecting")
        .expect("upgrade failed");
    ws
}

async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let frame = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("receive failed");
        match frame {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// True if the stream stays silent (no data frame) for a short window.
async fn stays_silent(ws: &mut WsStream) -> bool {
    timeout(SILENCE_TIMEOUT, ws.next()).await.is_err()
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        )
        .await
        .unwrap();
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response).await;
    response
}

/// A finished client handshake does not mean the server has registered the
/// connection yet; poll the health endpoint until it has.
async fn wait_for_active_connections(addr: SocketAddr, expected: usize) {
    timeout(TIMEOUT, async {
        loop {
            let body = http_get(addr, "/health").await;
            if body.contains(&format!("\"active\":{expected}")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {expected} connections"));
}

#[tokio::test]
async fn broadcast_reaches_other_clients_but_not_the_sender() {
    let addr = boot_server(test_settings(vec![])).await;

    let mut c1 = ws_connect(addr).await;
    let mut c2 = ws_connect(addr).await;
    let mut c3 = ws_connect(addr).await;
    wait_for_active_connections(addr, 3).await;

    c1.send(Message::Text("hello".into())).await.unwrap();

    assert_eq!(recv_text(&mut c2).await, "hello");
    assert_eq!(recv_text(&mut c3).await, "hello");
    assert!(stays_silent(&mut c1).await, "sender should not be echoed");
}

#[tokio::test]
async fn messages_from_one_client_arrive_in_order() {
    let addr = boot_server(test_settings(vec![])).await;

    let mut sender = ws_connect(addr).await;
    let mut receiver = ws_connect(addr).await;
    wait_for_active_connections(addr, 2).await;

    for text in ["m1", "m2", "m3"] {
        sender.send(Message::Text(text.into())).await.unwrap();
    }

    for expected in ["m1", "m2", "m3"] {
        assert_eq!(recv_text(&mut receiver).await, expected);
    }
}

#[tokio::test]
async fn abrupt_disconnect_leaves_server_accepting() {
    let addr = boot_server(test_settings(vec![])).await;

    // C1 connects and vanishes without a close handshake.
    let c1 = ws_connect(addr).await;
    drop(c1);

    let mut c2 = ws_connect(addr).await;
    let mut c3 = ws_connect(addr).await;
    wait_for_active_connections(addr, 2).await;

    c2.send(Message::Text("still here".into())).await.unwrap();
    assert_eq!(recv_text(&mut c3).await, "still here");
}

#[tokio::test]
async fn failed_handshake_does_not_take_down_the_process() {
    let addr = boot_server(test_settings(vec![])).await;

    // A plain GET without upgrade headers is a per-request error.
    let response = http_get(addr, "/ws").await;
    assert!(
        response.starts_with("HTTP/1.1 4"),
        "expected a client error, got: {}",
        response.lines().next().unwrap_or("")
    );

    // The hub still relays for clients that upgrade properly.
    let mut c1 = ws_connect(addr).await;
    let mut c2 = ws_connect(addr).await;
    wait_for_active_connections(addr, 2).await;
    c1.send(Message::Text("survived".into())).await.unwrap();
    assert_eq!(recv_text(&mut c2).await, "survived");
}

#[tokio::test]
async fn disallowed_origin_is_rejected_with_403() {
    let allowed = "http://app.example.com".to_string();
    let addr = boot_server(test_settings(vec![allowed.clone()])).await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://evil.example.com".parse().unwrap());

    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 403),
        other => panic!("expected HTTP 403 rejection, got {other:?}"),
    }

    // A listed origin still gets through.
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request.headers_mut().insert("Origin", allowed.parse().unwrap());
    let (_ws, _) = connect_async(request).await.expect("allowed origin should upgrade");
}

#[tokio::test]
async fn stats_endpoint_reports_hub_counters() {
    let addr = boot_server(test_settings(vec![])).await;

    let mut c1 = ws_connect(addr).await;
    let mut c2 = ws_connect(addr).await;
    wait_for_active_connections(addr, 2).await;

    c1.send(Message::Text("count me".into())).await.unwrap();
    assert_eq!(recv_text(&mut c2).await, "count me");

    let response = http_get(addr, "/stats").await;
    let body = response.split("\r\n\r\n").nth(1).expect("response should have a body");
    let stats: serde_json::Value = serde_json::from_str(body.trim()).unwrap();

    assert_eq!(stats["connections"]["active_connections"], 2);
    assert_eq!(stats["messages"]["published"], 1);
    assert!(stats["messages"]["delivered"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn custom_origin_predicate_is_honored() {
    let (state, fanout) = AppState::new(test_settings(vec![]));
    let state = state.with_origin_policy(OriginPolicy::custom(|origin| {
        origin.map(|o| o.ends_with(".internal")).unwrap_or(false)
    }));
    let addr = serve_app(state, fanout).await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://dashboard.internal".parse().unwrap());
    let (_ws, _) = connect_async(request)
        .await
        .expect("predicate should accept .internal origins");

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://example.com".parse().unwrap());
    assert!(connect_async(request).await.is_err());
}

#[tokio::test]
async fn binary_frames_are_relayed_byte_for_byte() {
    let addr = boot_server(test_settings(vec![])).await;

    let mut c1 = ws_connect(addr).await;
    let mut c2 = ws_connect(addr).await;
    wait_for_active_connections(addr, 2).await;
    let bytes = vec![0u8, 1, 2, 250, 255];

    c1.send(Message::Binary(bytes.clone().into())).await.unwrap();

    let frame = timeout(TIMEOUT, c2.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("receive failed");
    match frame {
        Message::Binary(data) => assert_eq!(data.as_ref(), bytes.as_slice()),
        other => panic!("expected binary frame, got {other:?}"),
    }
}
