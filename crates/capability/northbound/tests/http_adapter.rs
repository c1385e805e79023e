use domain::CollectData;
use gw_northbound::{HttpAdapter, NorthboundAdapter, NorthboundError};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// 单次请求的 HTTP 桩：返回 (地址, 请求头+体)。
async fn serve_once(status: &'static str, reply: &'static str) -> (String, oneshot::Receiver<(String, Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let (head, body) = loop {
            let n = socket.read(&mut chunk).await.expect("read");
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let head = text[..split].to_string();
                let length = head
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    let body = buf[split + 4..split + 4 + length].to_vec();
                    break (head, body);
                }
            }
            if n == 0 {
                break (text, Vec::new());
            }
        };
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            reply.len(),
            reply
        );
        socket.write_all(response.as_bytes()).await.expect("write");
        let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let _ = tx.send((head, body));
    });
    (format!("http://{}/ingest", addr), rx)
}

#[tokio::test]
async fn posts_data_body_with_headers() {
    let (url, captured) = serve_once("200 OK", "ok").await;
    let adapter = HttpAdapter::new("cloud");
    adapter
        .initialize(&json!({"url": url, "headers": {"X-Token": "secret"}, "timeout": 5}))
        .await
        .expect("initialize");

    let data = CollectData::new(1, "meter", 1_700_000_000_000).with_field("temperature", "25.500000");
    adapter.send(&data).await.expect("send");

    let (head, body) = captured.await.expect("request");
    let head = head.to_ascii_lowercase();
    assert!(head.starts_with("post /ingest"));
    assert!(head.contains("x-token: secret"));
    assert!(head.contains("content-type: application/json"));
    assert_eq!(body["device_name"], "meter");
    assert_eq!(body["timestamp"], 1_700_000_000_000i64);
    assert_eq!(body["fields"]["temperature"], "25.500000");
}

#[tokio::test]
async fn error_status_is_reported() {
    let (url, _captured) = serve_once("503 Service Unavailable", "busy").await;
    let adapter = HttpAdapter::new("cloud");
    adapter.initialize(&json!({"url": url})).await.expect("initialize");

    let err = adapter
        .send(&CollectData::new(1, "meter", 1).with_field("a", "1"))
        .await
        .expect_err("503");
    match err {
        NorthboundError::Http { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "busy");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        NorthboundError::Http { status: 503, body: "busy".to_string() }.to_string(),
        "HTTP error 503: busy"
    );
}

#[tokio::test]
async fn url_is_required() {
    let adapter = HttpAdapter::new("cloud");
    let err = adapter.initialize(&json!({"headers": {}})).await.expect_err("missing url");
    assert!(matches!(err, NorthboundError::InvalidConfig(_)));

    let err = adapter
        .send(&CollectData::new(1, "meter", 1))
        .await
        .expect_err("not initialized");
    assert!(matches!(err, NorthboundError::Transport(_)));
}
