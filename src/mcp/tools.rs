//! MCP Tools Implementation
//!
//! Document store tools, plus GitHub tools when a token is configured.
//! Arguments are decoded into typed structs; bad arguments and downstream
//! failures come back as tool results flagged `isError`.

use crate::config::ServerConfig;
use crate::github::GitHubClient;
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use crate::store::DocumentStore;
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, error};

/// Decode tool arguments, or produce the error result to return instead
fn parse_arguments<T: DeserializeOwned>(
    tool: &str,
    params: CallToolParams,
) -> Result<T, CallToolResult> {
    let arguments = Value::Object(params.arguments.unwrap_or_default());
    serde_json::from_value(arguments)
        .map_err(|e| CallToolResult::error(format!("Invalid arguments for {}: {}", tool, e)))
}

fn require_non_blank(name: &str, value: &str) -> Result<(), CallToolResult> {
    if value.trim().is_empty() {
        Err(CallToolResult::error(format!("{} must not be empty", name)))
    } else {
        Ok(())
    }
}

/// Store document tool handler
pub struct StoreDocumentHandler {
    store: Arc<DocumentStore>,
}

/// Metadata arrives either as an object or as a string holding one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetadataArgument {
    Object(Map<String, Value>),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
struct StoreDocumentArgs {
    content: String,
    metadata: MetadataArgument,
}

impl MetadataArgument {
    fn into_object(self) -> Result<Map<String, Value>, String> {
        match self {
            Self::Object(map) => Ok(map),
            Self::Encoded(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err("metadata must be a JSON object".to_string()),
                Err(e) => Err(format!("Invalid metadata JSON: {}", e)),
            },
        }
    }
}

impl StoreDocumentHandler {
    #[inline]
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Create the store_document tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "store_document".to_string(),
            description: Some(
                "Store a text document with metadata for later semantic search".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "Text content of the document"
                    },
                    "metadata": {
                        "type": ["object", "string"],
                        "description": "JSON object (or a string containing one) stored with the document"
                    }
                },
                "required": ["content", "metadata"],
                "additionalProperties": false
            }),
        }
    }

    async fn store_document(
        &self,
        params: CallToolParams,
    ) -> Result<CallToolResult, CallToolResult> {
        let args: StoreDocumentArgs = parse_arguments("store_document", params)?;
        require_non_blank("content", &args.content)?;
        let metadata = args.metadata.into_object().map_err(CallToolResult::error)?;

        self.store
            .add(&args.content, &metadata)
            .await
            .map_err(|e| {
                error!("Failed to add document: {}", e);
                CallToolResult::error(format!("Failed to add document: {}", e))
            })?;

        Ok(CallToolResult::text("Document added successfully"))
    }
}

#[async_trait]
impl ToolHandler for StoreDocumentHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        Ok(self
            .store_document(params)
            .await
            .unwrap_or_else(|failure| failure))
    }
}

/// Similarity search tool handler
pub struct SimilaritySearchHandler {
    store: Arc<DocumentStore>,
    default_limit: u32,
    max_limit: u32,
}

#[derive(Debug, Deserialize)]
struct SimilaritySearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<f64>,
}

impl SimilaritySearchHandler {
    #[inline]
    pub fn new(store: Arc<DocumentStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            default_limit: config.default_search_limit,
            max_limit: config.max_search_limit,
        }
    }

    /// Create the similarity_search tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "similarity_search".to_string(),
            description: Some("Find stored documents semantically similar to a query".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Text to search for"
                    },
                    "limit": {
                        "type": "number",
                        "description": "Maximum number of results (default: 5)"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    /// Requested limit, truncated and clamped to `1..=max_limit`
    fn effective_limit(&self, requested: Option<f64>) -> NonZeroU32 {
        let max = self.max_limit.max(1);
        let limit = match requested {
            Some(value) if value.is_finite() => {
                // Float to int `as` saturates, so oversized values land on max
                (value.trunc() as u32).clamp(1, max)
            }
            _ => self.default_limit.clamp(1, max),
        };
        NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN)
    }

    async fn search(&self, params: CallToolParams) -> Result<CallToolResult, CallToolResult> {
        let args: SimilaritySearchArgs = parse_arguments("similarity_search", params)?;
        require_non_blank("query", &args.query)?;
        let limit = self.effective_limit(args.limit);

        debug!("Similarity search: limit={}", limit);

        let results = self.store.search(&args.query, limit).await.map_err(|e| {
            error!("Search failed: {}", e);
            CallToolResult::error(format!("Search failed: {}", e))
        })?;

        let formatted: Vec<Value> = results
            .into_iter()
            .map(|result| {
                json!({
                    "id": result.document.id,
                    "content": result.document.content,
                    "metadata": result.document.metadata,
                    "distance": result.distance,
                })
            })
            .collect();

        let response = json!({
            "count": formatted.len(),
            "results": formatted,
        });

        serde_json::to_string_pretty(&response)
            .map(CallToolResult::text)
            .map_err(|e| CallToolResult::error(format!("Failed to format results: {}", e)))
    }
}

#[async_trait]
impl ToolHandler for SimilaritySearchHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        Ok(self.search(params).await.unwrap_or_else(|failure| failure))
    }
}

/// GitHub repository search tool handler
pub struct SearchRepositoriesHandler {
    github: Arc<GitHubClient>,
}

#[derive(Debug, Deserialize)]
struct SearchRepositoriesArgs {
    query: String,
}

impl SearchRepositoriesHandler {
    #[inline]
    pub fn new(github: Arc<GitHubClient>) -> Self {
        Self { github }
    }

    /// Create the search_repositories tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "search_repositories".to_string(),
            description: Some("Search GitHub repositories".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query for repositories"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchRepositoriesHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args: SearchRepositoriesArgs = match parse_arguments("search_repositories", params) {
            Ok(args) => args,
            Err(failure) => return Ok(failure),
        };

        match self.github.search_repositories(&args.query).await {
            Ok(repositories) => Ok(CallToolResult::text(serde_json::to_string_pretty(
                &repositories,
            )?)),
            Err(e) => {
                error!("Error searching repositories: {}", e);
                Ok(CallToolResult::error(format!(
                    "Error searching repositories: {}",
                    e
                )))
            }
        }
    }
}

/// GitHub issue creation tool handler
pub struct CreateIssueHandler {
    github: Arc<GitHubClient>,
}

#[derive(Debug, Deserialize)]
struct CreateIssueArgs {
    owner: String,
    repo: String,
    title: String,
    body: String,
}

impl CreateIssueHandler {
    #[inline]
    pub fn new(github: Arc<GitHubClient>) -> Self {
        Self { github }
    }

    /// Create the create_issue tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_issue".to_string(),
            description: Some("Create a new issue in a repository".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string", "description": "Repository owner"},
                    "repo": {"type": "string", "description": "Repository name"},
                    "title": {"type": "string", "description": "Issue title"},
                    "body": {"type": "string", "description": "Issue body"}
                },
                "required": ["owner", "repo", "title", "body"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateIssueHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args: CreateIssueArgs = match parse_arguments("create_issue", params) {
            Ok(args) => args,
            Err(failure) => return Ok(failure),
        };

        match self
            .github
            .create_issue(&args.owner, &args.repo, &args.title, &args.body)
            .await
        {
            Ok(issue) => Ok(CallToolResult::text(format!(
                "Created issue #{}: {}",
                issue.number, issue.url
            ))),
            Err(e) => {
                error!("Error creating issue: {}", e);
                Ok(CallToolResult::error(format!("Error creating issue: {}", e)))
            }
        }
    }
}

/// Register the document tools, and the GitHub tools when a client is given
#[inline]
pub async fn register_tools(
    server: &McpServer,
    store: Arc<DocumentStore>,
    github: Option<Arc<GitHubClient>>,
    config: &ServerConfig,
) {
    server
        .register_tool(
            StoreDocumentHandler::tool_definition(),
            StoreDocumentHandler::new(Arc::clone(&store)),
        )
        .await;
    server
        .register_tool(
            SimilaritySearchHandler::tool_definition(),
            SimilaritySearchHandler::new(store, config),
        )
        .await;

    if let Some(github) = github {
        server
            .register_tool(
                SearchRepositoriesHandler::tool_definition(),
                SearchRepositoriesHandler::new(Arc::clone(&github)),
            )
            .await;
        server
            .register_tool(
                CreateIssueHandler::tool_definition(),
                CreateIssueHandler::new(github),
            )
            .await;
    }
}
