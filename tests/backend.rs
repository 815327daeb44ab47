//! Backend client integration tests
//!
//! Drives the HTTP client against a mock server; no running backend needed.

use talkback_client::config::BackendConfig;
use talkback_client::{BackendClient, Error, HistoryMessage, VoiceBackend};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> BackendClient {
    let config = BackendConfig::with_base_url(&server.uri()).unwrap();
    BackendClient::new(&config).unwrap()
}

#[tokio::test]
async fn test_transcribe_uploads_multipart_and_trims() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"text": "  turn on the lights \n"})),
        )
        .mount(&server)
        .await;

    let transcript = client_for(&server).transcribe(vec![0; 64]).await.unwrap();
    assert_eq!(transcript, "turn on the lights");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let content_type = requests[0]
        .headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));

    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains(r#"name="audio""#));
    assert!(body.contains(r#"filename="utterance.wav""#));
}

#[tokio::test]
async fn test_transcribe_surfaces_backend_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stt"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(serde_json::json!({"detail": "audio too short"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).transcribe(vec![0; 8]).await.unwrap_err();
    assert!(matches!(err, Error::Stt(_)));
    let message = err.to_string();
    assert!(message.contains("422"));
    assert!(message.contains("audio too short"));
}

#[tokio::test]
async fn test_error_without_detail_falls_back_to_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stt"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .mount(&server)
        .await;

    let err = client_for(&server).transcribe(vec![0; 8]).await.unwrap_err();
    assert!(err.to_string().contains("backend exploded"));
}

#[tokio::test]
async fn test_chat_posts_the_message_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_json(serde_json::json!({"message": "hello"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"reply": " hi there "})),
        )
        .mount(&server)
        .await;

    let reply = client_for(&server).chat("hello").await.unwrap();
    assert_eq!(reply, "hi there");
}

#[tokio::test]
async fn test_chat_failure_carries_the_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(serde_json::json!({"detail": "rate limited"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).chat("hello").await.unwrap_err();
    assert!(matches!(err, Error::Chat(_)));
    assert!(err.to_string().contains("rate limited"));
}

#[tokio::test]
async fn test_synthesize_returns_bytes_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_json(serde_json::json!({"text": "hi there"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0xff, 0xf3, 0x44, 0x00])
                .insert_header("content-type", "audio/mpeg"),
        )
        .mount(&server)
        .await;

    let speech = client_for(&server).synthesize("hi there").await.unwrap();
    assert_eq!(speech.bytes, vec![0xff, 0xf3, 0x44, 0x00]);
    assert_eq!(speech.content_type.as_deref(), Some("audio/mpeg"));
}

#[tokio::test]
async fn test_history_parses_the_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        })))
        .mount(&server)
        .await;

    let history = client_for(&server).history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[0],
        HistoryMessage {
            role: "user".to_string(),
            content: "hi".to_string()
        }
    );
    assert_eq!(history[1].content, "hello");
}

#[tokio::test]
async fn test_history_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    assert!(client_for(&server).history().await.is_err());
}
