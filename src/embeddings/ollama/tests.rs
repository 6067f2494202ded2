use super::*;
use crate::config::ProviderKind;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer, model: &str) -> OllamaClient {
    let config = EmbeddingConfig {
        provider: ProviderKind::Ollama,
        base_url: Some(server.uri()),
        model: Some(model.to_string()),
        dimension: Some(3),
        ..EmbeddingConfig::default()
    };
    OllamaClient::new(&config)
        .expect("should create client")
        .with_backoff(Duration::from_millis(1))
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        provider: ProviderKind::Ollama,
        base_url: Some("http://test-host:1234".to_string()),
        model: Some("test-model".to_string()),
        ..EmbeddingConfig::default()
    };
    let client = OllamaClient::new(&config)
        .expect("Failed to create client")
        .with_retry_attempts(5);

    assert_eq!(client.model, "test-model");
    assert_eq!(client.dimension, 768);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry.attempts, 5);
}

#[test]
fn model_name_matching() {
    let config = EmbeddingConfig {
        provider: ProviderKind::Ollama,
        model: Some("nomic-embed-text".to_string()),
        ..EmbeddingConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert!(client.matches_model("nomic-embed-text:latest"));
    assert!(client.matches_model("nomic-embed-text"));
    assert!(!client.matches_model("mxbai-embed-large"));
}

#[tokio::test]
async fn embeds_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(json!({"model": "nomic-embed-text", "input": "cats"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, 0.25, 0.125]]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, "nomic-embed-text");
    let embedding = client.embed("cats").await.expect("should embed");
    assert_eq!(embedding.as_slice(), &[0.5, 0.25, 0.125]);
}

#[tokio::test]
async fn empty_embeddings_is_no_embedding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": []})))
        .mount(&server)
        .await;

    let client = test_client(&server, "nomic-embed-text");
    assert!(matches!(
        client.embed("cats").await,
        Err(EmbeddingError::NoEmbedding)
    ));
}

#[tokio::test]
async fn health_check_reports_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:latest", "size": 1, "digest": "abc"}]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server, "nomic-embed-text");
    match client.health_check().await {
        Err(EmbeddingError::ModelUnavailable { model, available }) => {
            assert_eq!(model, "nomic-embed-text");
            assert_eq!(available, vec!["llama3:latest".to_string()]);
        }
        other => panic!("expected missing model, got {:?}", other),
    }
}

#[tokio::test]
async fn health_check_passes_with_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "nomic-embed-text:latest"}]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server, "nomic-embed-text");
    assert!(client.health_check().await.is_ok());
}
