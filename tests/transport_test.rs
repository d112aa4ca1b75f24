use mcp_router::core::protocol::{JsonRpcRequest, RequestId};
use mcp_router::transport::{SseTransport, StdioTransport, StreamableHttpTransport, Transport};
use mcp_router::RouterError;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_streamable_http_request_response() {
    let server = MockServer::start().await;

    // Fresh transport, so the first request id is 1.
    let body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "session-123")
                .set_body_raw(body, "application/x-ndjson"),
        )
        .mount(&server)
        .await;

    let transport =
        StreamableHttpTransport::new(format!("{}/mcp", server.uri()), TIMEOUT).unwrap();

    let response = transport
        .send_request(JsonRpcRequest::new("tools/list", None))
        .await
        .unwrap();
    assert_eq!(response.id, Some(RequestId::Number(1)));
    assert!(response.error.is_none());

    // The session id from the response header is carried on later
    // requests as a query parameter.
    let _ = transport
        .send_notification(JsonRpcRequest::new("notifications/initialized", None))
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].url.query().unwrap_or("").contains("session-123"));
}

#[tokio::test]
async fn test_streamable_http_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let transport = StreamableHttpTransport::new(server.uri(), TIMEOUT).unwrap();
    let err = transport
        .send_request(JsonRpcRequest::new("tools/list", None))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Connection(_)));
}

#[tokio::test]
async fn test_streamable_http_rejects_bad_url() {
    assert!(StreamableHttpTransport::new("not a url", TIMEOUT).is_err());
}

#[tokio::test]
async fn test_sse_close_tears_down_the_stream() {
    // Hand-rolled endpoint: serve the event-stream headers, then keep the
    // socket open so the reader task stays parked on it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n")
            .await
            .unwrap();
        let _ = socket.read(&mut buf).await;
    });

    let transport = SseTransport::new(format!("http://{}", addr), TIMEOUT)
        .await
        .unwrap();
    assert!(transport.is_connected().await);

    // close must not wait for the remote to hang up.
    transport.close().await.unwrap();
    assert!(!transport.is_connected().await);

    let err = transport
        .send_request(JsonRpcRequest::new("ping", None))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Connection(_)));
    server.abort();
}

#[tokio::test]
async fn test_sse_rejects_error_status_on_connect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = SseTransport::new(server.uri(), TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RouterError::Connection(_)));
}

#[tokio::test]
async fn test_stdio_round_trip_against_cat() {
    // `cat` echoes each request line back; the echoed request carries the
    // same id and parses as a response with neither result nor error.
    let transport = StdioTransport::new("cat", vec![], HashMap::new(), TIMEOUT)
        .await
        .unwrap();
    assert!(transport.is_connected().await);

    let response = transport
        .send_request(JsonRpcRequest::new("ping", Some(json!({"n": 1}))))
        .await
        .unwrap();
    assert_eq!(response.id, Some(RequestId::Number(1)));

    transport.close().await.unwrap();
    assert!(!transport.is_connected().await);

    let err = transport
        .send_request(JsonRpcRequest::new("ping", None))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Connection(_)));
}

#[tokio::test]
async fn test_stdio_spawn_failure() {
    let result = StdioTransport::new(
        "definitely-not-a-real-binary-3f9c",
        vec![],
        HashMap::new(),
        TIMEOUT,
    )
    .await;
    assert!(matches!(result, Err(RouterError::Connection(_))));
}

#[tokio::test]
async fn test_stdio_request_timeout() {
    // `sleep` never answers, so the call must time out rather than hang.
    let transport = StdioTransport::new(
        "sleep",
        vec!["30".to_string()],
        HashMap::new(),
        Duration::from_millis(200),
    )
    .await
    .unwrap();

    let err = transport
        .send_request(JsonRpcRequest::new("ping", None))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Timeout(_)));

    transport.close().await.unwrap();
}
