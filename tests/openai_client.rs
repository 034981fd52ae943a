//! Wire contract of the OpenAI-compatible client, against a wiremock server.

mod common;

use common::{source, FakeRenderer};
use serde_json::json;
use sheet2md::pipeline::llm::call_with_policy;
use sheet2md::pipeline::request::{build_extraction_request, ExtractionRequest};
use sheet2md::{ConversionConfig, Converter, ModelBackend, ModelClient, ModelError, OpenAiClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn completion(text: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

fn client(server: &MockServer, timeout: Duration) -> OpenAiClient {
    OpenAiClient::new("sk-test".into(), &format!("{}/v1/", server.uri()), timeout).unwrap()
}

fn page_request() -> sheet2md::pipeline::request::ChatRequest {
    let req = ExtractionRequest {
        instructions: "Extract the sheet".into(),
        image_data_uri: "data:image/jpeg;base64,QUJD".into(),
    };
    build_extraction_request(&req, &ConversionConfig::default())
}

#[tokio::test]
async fn sends_bearer_auth_and_vision_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4-vision-preview",
            "max_tokens": 4000,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Extract the sheet"},
                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,QUJD"}}
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("| STR | 16 |")))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server, Duration::from_secs(5))
        .complete(&page_request())
        .await
        .unwrap();
    assert_eq!(text, "| STR | 16 |");
}

#[tokio::test]
async fn api_errors_carry_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .complete(&page_request())
        .await
        .unwrap_err();
    match err {
        ModelError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_content_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .complete(&page_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::MalformedResponse(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn slow_response_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_millis(200))
        .complete(&page_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Timeout { .. }));
}

#[tokio::test]
async fn overloaded_endpoint_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("second try")))
        .mount(&server)
        .await;

    let config = ConversionConfig::builder()
        .max_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let permits = Semaphore::new(1);
    let http = client(&server, Duration::from_secs(5));

    let text = call_with_policy(&http, &permits, &page_request(), &config, "test")
        .await
        .unwrap();
    assert_eq!(text, "second try");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn converter_sends_one_jpeg_request_per_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(|req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let url = body["messages"][0]["content"][1]["image_url"]["url"]
                .as_str()
                .unwrap_or_default();
            let text = if url.starts_with("data:image/jpeg;base64,") {
                "sheet page"
            } else {
                "unexpected"
            };
            ResponseTemplate::new(200).set_body_json(completion(text))
        })
        .expect(2)
        .mount(&server)
        .await;

    let backend = ModelBackend::openai("sk-test", Some(format!("{}/v1", server.uri())));
    let config = ConversionConfig::builder().build().unwrap();
    let conv = Converter::from_backend(&backend, Arc::new(FakeRenderer), config).unwrap();

    let doc = conv.convert_single(source("hero.pdf", 2, 1)).await;
    assert_eq!(doc.text, "sheet page\n---\nsheet page\n---\n");
}
