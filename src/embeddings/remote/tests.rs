use super::*;
use serde_json::json;
use serial_test::serial;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|t| (*t).to_string()).collect()
}

fn embedder_for(server: &MockServer) -> RemoteEmbedder {
    RemoteEmbedder::new(&format!("{}/v1", server.uri()), "test-model", "test-key".to_string())
        .expect("valid embedder")
        .with_timeout(Duration::from_secs(5))
}

#[test]
fn endpoint_normalisation() {
    assert_eq!(
        embeddings_endpoint("https://api.example.com/v1"),
        "https://api.example.com/v1/embeddings"
    );
    assert_eq!(
        embeddings_endpoint("https://api.example.com/v1/"),
        "https://api.example.com/v1/embeddings"
    );
    assert_eq!(
        embeddings_endpoint("https://api.example.com/v1/embeddings"),
        "https://api.example.com/v1/embeddings"
    );
    assert_eq!(
        embeddings_endpoint("https://api.example.com"),
        "https://api.example.com/v1/embeddings"
    );
    assert_eq!(
        embeddings_endpoint("https://open.example.com/api/v4"),
        "https://open.example.com/api/v4/embeddings"
    );
}

#[test]
fn builder_methods() {
    let embedder = RemoteEmbedder::new("http://localhost:1234/v1", "m", "k".to_string())
        .expect("valid embedder")
        .with_batch_size(0)
        .with_retry_attempts(0);

    assert_eq!(embedder.batch_size, 1);
    assert_eq!(embedder.retry_attempts, 1);
    assert_eq!(embedder.model(), "m");
    assert_eq!(
        embedder.endpoint().as_str(),
        "http://localhost:1234/v1/embeddings"
    );
}

#[test]
#[serial]
fn missing_api_key_is_a_configuration_error() {
    let config = EmbeddingConfig {
        api_key_env: "KNOWLEDGE_RAG_TEST_MISSING_KEY".to_string(),
        ..EmbeddingConfig::default()
    };
    // SAFETY: serialised with other environment-mutating tests
    unsafe { std::env::remove_var("KNOWLEDGE_RAG_TEST_MISSING_KEY") };

    assert!(matches!(
        RemoteEmbedder::from_config(&config),
        Err(RagError::Config(_))
    ));
}

#[test]
fn empty_input_makes_no_request() {
    let embedder = RemoteEmbedder::new("http://127.0.0.1:1/v1", "m", "k".to_string())
        .expect("valid embedder");
    assert!(embedder.embed(&[]).expect("empty input succeeds").is_empty());
}

#[tokio::test]
async fn embeddings_follow_response_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "encoding_format": "float"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embeddings = embedder_for(&server)
        .embed(&texts(&["first", "second"]))
        .expect("embedding should succeed");

    assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn requests_are_batched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({"input": ["a", "b"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"index": 0, "embedding": [1.0, 0.0, 0.0]},
                {"index": 1, "embedding": [0.0, 1.0, 0.0]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({"input": ["c"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [0.0, 0.0, 1.0]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embeddings = embedder_for(&server)
        .with_batch_size(2)
        .embed(&texts(&["a", "b", "c"]))
        .expect("embedding should succeed");

    assert_eq!(embeddings.len(), 3);
    assert_eq!(embeddings[2], vec![0.0, 0.0, 1.0]);
}

#[tokio::test]
async fn http_errors_surface() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let result = embedder_for(&server).embed(&texts(&["query"]));
    assert!(matches!(result, Err(RagError::Embedding(_))));
}

#[tokio::test]
async fn count_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [1.0]}]
        })))
        .mount(&server)
        .await;

    let result = embedder_for(&server).embed(&texts(&["one", "two"]));
    assert!(matches!(result, Err(RagError::Embedding(_))));
}

#[tokio::test]
async fn malformed_response_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let result = embedder_for(&server).embed(&texts(&["one"]));
    assert!(matches!(result, Err(RagError::Embedding(_))));
}
