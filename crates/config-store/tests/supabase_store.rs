//! `SupabaseStore` against loopback servers: a raw HTTP responder for the
//! REST read and a tungstenite server speaking the realtime channel protocol.

use std::time::Duration;

use config_store::realtime::PhoenixMessage;
use config_store::{ConfigRow, ConfigStore, StoreError, StoreSettings, SupabaseStore};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

const TOPIC: &str = "realtime:public:pricing_config";
const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, StoreSettings) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let settings = StoreSettings::new(&format!("http://{addr}"), "key")
        .unwrap()
        .with_request_timeout(WAIT)
        .with_join_timeout(WAIT);
    (listener, settings)
}

/// Store over a plain reqwest client; the loopback servers never speak TLS.
fn plain_store(settings: StoreSettings) -> SupabaseStore {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let client = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()
        .unwrap();
    SupabaseStore::with_client(client, settings)
}

mod rest {
    use super::*;

    /// Answer one request with `status` and a JSON `body`; yields the raw request head.
    fn respond_once(
        listener: TcpListener,
        status: &'static str,
        body: &'static str,
    ) -> JoinHandle<String> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending a request");
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;

            String::from_utf8_lossy(&request).to_lowercase()
        })
    }

    #[tokio::test]
    async fn test_rows_are_fetched_with_auth_headers() {
        let (listener, settings) = bind().await;
        let server = respond_once(
            listener,
            "200 OK",
            r#"[{"config_key":"diver_rate","config_value":"85.50"},{"config_key":"travel_fee","config_value":"25"}]"#,
        );

        let rows = plain_store(settings).fetch_rows().await.unwrap();
        assert_eq!(
            rows,
            vec![
                ConfigRow::new("diver_rate", "85.50"),
                ConfigRow::new("travel_fee", "25"),
            ]
        );

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "get /rest/v1/pricing_config?select=config_key%2cconfig_value http/1.1"
        ));
        assert!(request.contains("apikey: key\r\n"));
        assert!(request.contains("authorization: bearer key\r\n"));
        assert!(request.contains("accept-profile: public\r\n"));
    }

    #[tokio::test]
    async fn test_unauthorized_becomes_status_error() {
        let (listener, settings) = bind().await;
        let server = respond_once(listener, "401 Unauthorized", r#"{"message":"denied"}"#);

        let err = plain_store(settings).fetch_rows().await.unwrap_err();
        match err {
            StoreError::Status { status, body } => {
                assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
                assert_eq!(body, r#"{"message":"denied"}"#);
            }
            other => panic!("expected status error, got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_array_body_is_decode_error() {
        let (listener, settings) = bind().await;
        let server = respond_once(listener, "200 OK", r#"{"rows":[]}"#);

        let err = plain_store(settings).fetch_rows().await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        server.await.unwrap();
    }
}

mod realtime {
    use super::*;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    /// Next channel message from the client, skipping control frames.
    async fn next_message(ws: &mut ServerSocket) -> PhoenixMessage {
        loop {
            let frame = timeout(WAIT, ws.next())
                .await
                .expect("client went quiet")
                .expect("client disconnected")
                .unwrap();
            if let Some(message) = PhoenixMessage::from_ws(&frame).unwrap() {
                return message;
            }
        }
    }

    async fn send(ws: &mut ServerSocket, value: Value) {
        ws.send(Message::text(value.to_string())).await.unwrap();
    }

    fn reply(msg_ref: Option<&str>, status: &str, response: Value) -> Value {
        json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "payload": { "status": status, "response": response },
            "ref": msg_ref,
        })
    }

    fn change(kind: &str, key: &str) -> Value {
        json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "data": {
                    "type": kind,
                    "schema": "public",
                    "table": "pricing_config",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "record": { "config_key": key, "config_value": "120" },
                },
                "ids": [1],
            },
        })
    }

    /// Accept the client, check its join and acknowledge it.
    async fn accept_join(listener: &TcpListener) -> ServerSocket {
        let mut ws = accept(listener).await;
        let join = next_message(&mut ws).await;

        assert_eq!(join.topic, TOPIC);
        assert_eq!(join.event, "phx_join");
        assert_eq!(
            join.payload["config"]["postgres_changes"][0],
            json!({ "event": "UPDATE", "schema": "public", "table": "pricing_config" })
        );

        send(&mut ws, reply(join.msg_ref.as_deref(), "ok", json!({}))).await;
        ws
    }

    #[tokio::test]
    async fn test_updates_are_forwarded_and_close_leaves_channel() {
        let (listener, settings) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept_join(&listener).await;

            send(&mut ws, change("INSERT", "new_fee")).await;
            send(&mut ws, change("UPDATE", "rate")).await;

            let leave = next_message(&mut ws).await;
            let after = timeout(WAIT, ws.next()).await.unwrap();
            (leave, after)
        });

        let store = plain_store(settings);
        let mut feed = store.subscribe_updates().await.unwrap();

        let event = timeout(WAIT, feed.recv()).await.unwrap().unwrap();
        assert_eq!(event.table, "pricing_config");
        assert_eq!(event.config_key.as_deref(), Some("rate"));
        assert!(event.commit_timestamp.is_some());

        feed.close();
        assert!(feed.recv().await.is_none());

        let (leave, after) = server.await.unwrap();
        assert_eq!(leave.topic, TOPIC);
        assert_eq!(leave.event, "phx_leave");
        assert!(matches!(after, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    }

    #[tokio::test]
    async fn test_rejected_join_is_subscription_error() {
        let (listener, settings) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let join = next_message(&mut ws).await;
            send(
                &mut ws,
                reply(join.msg_ref.as_deref(), "error", json!({ "reason": "unauthorized" })),
            )
            .await;
        });

        let store = plain_store(settings);
        let err = store.subscribe_updates().await.unwrap_err();

        match err {
            StoreError::Subscription(message) => assert!(message.contains("unauthorized")),
            other => panic!("expected subscription error, got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_before_join_reply_is_skipped() {
        let (listener, settings) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let join = next_message(&mut ws).await;

            ws.send(Message::text("not json".to_string())).await.unwrap();
            send(&mut ws, reply(join.msg_ref.as_deref(), "ok", json!({}))).await;
            ws
        });

        let store = plain_store(settings);
        let feed = store.subscribe_updates().await.unwrap();
        assert!(!feed.is_closed());

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeats_are_sent_on_phoenix_topic() {
        let (listener, settings) = bind().await;
        let settings = settings.with_heartbeat_interval(Duration::from_millis(50));
        let server = tokio::spawn(async move {
            let mut ws = accept_join(&listener).await;
            next_message(&mut ws).await
        });

        let store = plain_store(settings);
        let _feed = store.subscribe_updates().await.unwrap();

        let heartbeat = server.await.unwrap();
        assert_eq!(heartbeat.topic, "phoenix");
        assert_eq!(heartbeat.event, "heartbeat");
    }

    #[tokio::test]
    async fn test_server_disconnect_closes_feed() {
        let (listener, settings) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept_join(&listener).await;
            ws.close(None).await.unwrap();
        });

        let store = plain_store(settings);
        let mut feed = store.subscribe_updates().await.unwrap();
        server.await.unwrap();

        assert!(timeout(WAIT, feed.recv()).await.unwrap().is_none());
    }
}
