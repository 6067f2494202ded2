#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! MCP Server Integration Tests
//!
//! Drives a fully wired server over in-memory pipes: the document tools on
//! an in-memory backend, and the GitHub tools against a mock API.

use agentic_chat_mcp::config::{GitHubConfig, ServerConfig};
use agentic_chat_mcp::database::{DistanceMetric, MemoryBackend};
use agentic_chat_mcp::embeddings::{Embedding, EmbeddingError, EmbeddingProvider};
use agentic_chat_mcp::github::GitHubClient;
use agentic_chat_mcp::mcp::protocol::MCP_VERSION;
use agentic_chat_mcp::mcp::{ConnectionState, McpServer, register_tools};
use agentic_chat_mcp::store::DocumentStore;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Two axes: pets and money. Anything else lands on a third axis.
struct TopicEmbedder;

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn name(&self) -> &str {
        "topic"
    }

    fn model(&self) -> &str {
        "topic-v1"
    }

    fn dimension(&self) -> usize {
        3
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let text = text.to_lowercase();
        let count = |words: &[&str]| words.iter().filter(|w| text.contains(*w)).count() as f32;
        let pets = count(&["cat", "dog", "pet", "kitten"]);
        let money = count(&["stock", "bond", "market", "price"]);
        let other = if pets + money == 0.0 { 1.0 } else { 0.0 };
        Ok(Embedding::new(vec![pets, money, other]))
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

fn memory_store() -> Arc<DocumentStore> {
    let backend = Arc::new(MemoryBackend::new(3, DistanceMetric::L2));
    Arc::new(DocumentStore::new(Arc::new(TopicEmbedder), backend).expect("dimensions agree"))
}

async fn wired_server(github: Option<Arc<GitHubClient>>) -> Arc<McpServer> {
    let server = McpServer::new("agentic-chat-mcp", "test", Duration::from_secs(5));
    register_tools(&server, memory_store(), github, &ServerConfig::default()).await;
    Arc::new(server)
}

struct Session {
    writer: DuplexStream,
    lines: Lines<BufReader<DuplexStream>>,
    server: JoinHandle<anyhow::Result<()>>,
    next_id: i64,
}

impl Session {
    async fn open(server: Arc<McpServer>) -> Self {
        let (writer, server_reader) = tokio::io::duplex(64 * 1024);
        let (server_writer, reader) = tokio::io::duplex(64 * 1024);
        let mut session = Self {
            writer,
            lines: BufReader::new(reader).lines(),
            server: tokio::spawn(server.serve(server_reader, server_writer)),
            next_id: 1,
        };

        let reply = session
            .request(
                "initialize",
                json!({
                    "protocolVersion": MCP_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "integration", "version": "1.0"}
                }),
            )
            .await;
        assert_eq!(reply["result"]["protocolVersion"], MCP_VERSION);
        assert_eq!(reply["result"]["serverInfo"]["name"], "agentic-chat-mcp");

        session
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        session
    }

    async fn send(&mut self, message: Value) {
        self.writer
            .write_all(format!("{message}\n").as_bytes())
            .await
            .expect("write to server");
    }

    async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;

        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("reply within timeout")
            .expect("read from server")
            .expect("server still connected");
        let reply: Value = serde_json::from_str(&line).expect("server writes JSON");
        assert_eq!(reply["id"], id);
        reply
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> (bool, String) {
        let reply = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await;
        let result = &reply["result"];
        let text = result["content"][0]["text"]
            .as_str()
            .expect("text content")
            .to_string();
        (result["isError"] == true, text)
    }

    async fn tool_names(&mut self) -> Vec<String> {
        let reply = self.request("tools/list", json!({})).await;
        reply["result"]["tools"]
            .as_array()
            .expect("tool array")
            .iter()
            .map(|tool| tool["name"].as_str().expect("tool name").to_string())
            .collect()
    }

    async fn close(mut self) {
        self.writer.shutdown().await.expect("close input");
        drop(self.writer);
        self.server
            .await
            .expect("server task")
            .expect("server finished cleanly");
    }
}

#[tokio::test]
async fn document_round_trip_over_the_protocol() {
    let server = wired_server(None).await;
    let mut session = Session::open(Arc::clone(&server)).await;

    let mut names = session.tool_names().await;
    names.sort();
    assert_eq!(names, vec!["similarity_search", "store_document"]);

    for (content, topic) in [
        ("my cat chases the dog", "pets"),
        ("bond prices fell as the stock market rallied", "finance"),
        ("the weather is mild today", "misc"),
    ] {
        let (is_error, text) = session
            .call_tool(
                "store_document",
                json!({"content": content, "metadata": {"topic": topic}}),
            )
            .await;
        assert!(!is_error, "{text}");
        assert_eq!(text, "Document added successfully");
    }

    let (is_error, text) = session
        .call_tool(
            "similarity_search",
            json!({"query": "kitten and pet care", "limit": 2}),
        )
        .await;
    assert!(!is_error, "{text}");

    let body: Value = serde_json::from_str(&text).expect("search output is JSON");
    assert_eq!(body["count"], 2);
    let results = body["results"].as_array().expect("results");
    assert_eq!(results[0]["content"], "my cat chases the dog");
    assert_eq!(results[0]["metadata"]["topic"], "pets");
    let first = results[0]["distance"].as_f64().expect("distance");
    let second = results[1]["distance"].as_f64().expect("distance");
    assert!(first <= second);

    session.close().await;
    assert_eq!(server.connection_state().await, ConnectionState::Closed);
}

#[tokio::test]
async fn invalid_tool_input_is_reported_to_the_client() {
    let mut session = Session::open(wired_server(None).await).await;

    let (is_error, text) = session
        .call_tool("store_document", json!({"content": "no metadata"}))
        .await;
    assert!(is_error);
    assert!(text.contains("Invalid arguments"), "{text}");

    let (is_error, text) = session
        .call_tool("similarity_search", json!({"query": "   "}))
        .await;
    assert!(is_error);
    assert!(text.contains("query"), "{text}");

    // GitHub tools are absent without a token
    let reply = session
        .request(
            "tools/call",
            json!({"name": "search_repositories", "arguments": {"query": "rust"}}),
        )
        .await;
    assert_eq!(reply["error"]["code"], -32001);

    session.close().await;
}

fn github_client(mock: &MockServer) -> Arc<GitHubClient> {
    let config = GitHubConfig {
        token: Some("ghp_integration".to_string()),
        api_url: mock.uri(),
        timeout_secs: 5,
    };
    Arc::new(GitHubClient::new(&config).expect("client builds"))
}

#[tokio::test]
async fn github_tools_reach_the_api() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "vector database"))
        .and(header("authorization", "Bearer ghp_integration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "items": [{
                "full_name": "pgvector/pgvector",
                "description": "Open-source vector similarity search for Postgres",
                "html_url": "https://github.com/pgvector/pgvector",
                "stargazers_count": 15000
            }]
        })))
        .expect(1)
        .mount(&mock)
        .await;

    Mock::given(method("POST"))
        .and(path("/repos/octo/widgets/issues"))
        .and(body_json(json!({"title": "Crash on start", "body": "Steps to reproduce"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "number": 7,
            "html_url": "https://github.com/octo/widgets/issues/7"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let mut session = Session::open(wired_server(Some(github_client(&mock))).await).await;

    let mut names = session.tool_names().await;
    names.sort();
    assert_eq!(
        names,
        vec![
            "create_issue",
            "search_repositories",
            "similarity_search",
            "store_document"
        ]
    );

    let (is_error, text) = session
        .call_tool("search_repositories", json!({"query": "vector database"}))
        .await;
    assert!(!is_error, "{text}");
    let repositories: Value = serde_json::from_str(&text).expect("repositories are JSON");
    assert_eq!(repositories[0]["full_name"], "pgvector/pgvector");
    assert_eq!(repositories[0]["stars"], 15000);

    let (is_error, text) = session
        .call_tool(
            "create_issue",
            json!({
                "owner": "octo",
                "repo": "widgets",
                "title": "Crash on start",
                "body": "Steps to reproduce"
            }),
        )
        .await;
    assert!(!is_error, "{text}");
    assert_eq!(
        text,
        "Created issue #7: https://github.com/octo/widgets/issues/7"
    );

    session.close().await;
}

#[tokio::test]
async fn github_failures_are_tool_errors() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
        )
        .mount(&mock)
        .await;

    let mut session = Session::open(wired_server(Some(github_client(&mock))).await).await;

    let (is_error, text) = session
        .call_tool("search_repositories", json!({"query": "anything"}))
        .await;
    assert!(is_error);
    assert!(text.starts_with("Error searching repositories"), "{text}");
    assert!(text.contains("Bad credentials"), "{text}");

    // The connection keeps working after a failed call
    let reply = session.request("ping", json!({})).await;
    assert!(reply.get("result").is_some());

    session.close().await;
}
