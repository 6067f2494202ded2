//! MCP Server Implementation
//!
//! Line-delimited JSON-RPC over a byte stream (stdio in production). Each
//! `tools/call` runs on its own task so slow tools do not block the
//! connection; every response goes through a single writer task.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

struct RegisteredTool {
    definition: Tool,
    handler: Arc<dyn ToolHandler>,
}

/// MCP Server state and configuration
pub struct McpServer {
    /// Server implementation information
    server_info: Implementation,
    /// Server capabilities
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    tools: RwLock<HashMap<String, RegisteredTool>>,
    connection_state: RwLock<ConnectionState>,
    /// `tools/call` requests still running, by request id
    in_flight: Mutex<HashMap<RequestId, AbortHandle>>,
    tool_timeout: Duration,
}

impl McpServer {
    /// Create a new MCP server
    #[inline]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        tool_timeout: Duration,
    ) -> Self {
        let capabilities = ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
        };

        Self {
            server_info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            capabilities,
            instructions: None,
            tools: RwLock::new(HashMap::new()),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
            in_flight: Mutex::new(HashMap::new()),
            tool_timeout,
        }
    }

    #[inline]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Register a tool with the server
    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();
        self.tools.write().await.insert(
            tool_name.clone(),
            RegisteredTool {
                definition: tool,
                handler: Arc::new(handler),
            },
        );
        debug!("Registered tool: {}", tool_name);
    }

    /// Names of the registered tools, sorted
    #[inline]
    pub async fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get current connection state
    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection until the reader reaches EOF.
    ///
    /// Tool calls still running at EOF are allowed to finish, bounded by the
    /// tool timeout, so their responses are written before returning.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_messages(writer, receiver));

        let mut reader = BufReader::new(reader);
        let mut tasks = JoinSet::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    self.dispatch_line(trimmed, &sender, &mut tasks).await;
                }
                Err(e) => {
                    error!("Error reading from input: {}", e);
                    break;
                }
            }

            // Reap finished tool calls so the set does not grow unbounded
            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        *self.connection_state.write().await = ConnectionState::Closed;

        drop(sender);
        writer_task
            .await
            .context("Writer task panicked")?
            .context("Failed to write response")?;

        info!("MCP server stopped");
        Ok(())
    }

    async fn dispatch_line(
        self: &Arc<Self>,
        line: &str,
        sender: &mpsc::UnboundedSender<JsonRpcMessage>,
        tasks: &mut JoinSet<()>,
    ) {
        let raw_value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                let error = McpError::ParseError {
                    message: format!("Parse error: {}", e),
                };
                error.log();
                send(sender, error.to_error_response(None));
                return;
            }
        };

        // Keep the id, if any, so a malformed request still gets an addressed reply
        let raw_id = raw_value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        let message = match JsonRpcMessage::from_value(raw_value) {
            Ok(message) => message,
            Err(error) => {
                error.log();
                send(sender, error.to_error_response(raw_id));
                return;
            }
        };

        match message {
            JsonRpcMessage::Request(request) if request.method == "tools/call" => {
                self.spawn_tool_call(request, sender, tasks).await;
            }
            JsonRpcMessage::Request(request) => {
                let reply = self.handle_request(request).await;
                send(sender, reply);
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_) => {
                warn!("Received unexpected response message from client");
            }
        }
    }

    async fn spawn_tool_call(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        sender: &mpsc::UnboundedSender<JsonRpcMessage>,
        tasks: &mut JoinSet<()>,
    ) {
        if let Err(error) = self.require_initialized().await {
            error.log();
            send(sender, error.to_error_response(Some(request.id)));
            return;
        }

        let id = request.id.clone();
        let server = Arc::clone(self);
        let sender = sender.clone();

        // Held until the task is registered so it cannot deregister first
        let mut in_flight = self.in_flight.lock().await;
        let handle = tasks.spawn(async move {
            let reply = match server.call_tool(request.params).await {
                Ok(result) => {
                    JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id.clone()))
                }
                Err(error) => {
                    error.log();
                    error.to_error_response(Some(request.id.clone()))
                }
            };
            server.in_flight.lock().await.remove(&request.id);
            send(&sender, reply);
        });
        if in_flight.insert(id.clone(), handle).is_some() {
            warn!("Request id {} reused while still in flight", id);
        }
    }

    /// Handle a JSON-RPC request other than `tools/call`
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools().await,
            "ping" => Ok(serde_json::json!({})),
            method => Err(McpError::MethodNotFound {
                method: method.to_string(),
            }),
        };

        match result {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id)),
            Err(error) => {
                error.log();
                error.to_error_response(Some(request.id))
            }
        }
    }

    /// Handle a JSON-RPC notification
    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => self.handle_initialized().await,
            "notifications/cancelled" => self.handle_cancelled(notification.params).await,
            _ => warn!("Unknown notification method: {}", notification.method),
        }
    }

    /// Handle initialize request
    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| McpError::InvalidParameters {
                message: format!("Invalid initialize parameters: {}", e),
            })?;

        let protocol_version = negotiate_protocol_version(&params.protocol_version).ok_or_else(
            || McpError::UnsupportedProtocolVersion {
                version: params.protocol_version.clone(),
                supported: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            },
        )?;

        {
            let mut state = self.connection_state.write().await;
            if *state != ConnectionState::Uninitialized {
                return Err(McpError::ServerAlreadyInitialized);
            }
            *state = ConnectionState::Initializing;
        }

        let result = InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };

        info!(
            "Client initialized: {} {} (protocol {})",
            params.client_info.name, params.client_info.version, protocol_version
        );
        Ok(serde_json::to_value(result)?)
    }

    /// Handle initialized notification
    async fn handle_initialized(&self) {
        let mut state = self.connection_state.write().await;
        if *state == ConnectionState::Initializing {
            *state = ConnectionState::Ready;
            info!("Server ready to handle requests");
        } else {
            warn!("Ignoring initialized notification in state {:?}", *state);
        }
    }

    /// Abort a running tool call. Its response is never sent.
    async fn handle_cancelled(&self, params: Option<Value>) {
        let params: CancelledParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            _ => {
                warn!("Ignoring malformed cancellation notification");
                return;
            }
        };

        let running = self.in_flight.lock().await.remove(&params.request_id);
        match running {
            Some(handle) => {
                handle.abort();
                info!(
                    "Cancelled request {}: {}",
                    params.request_id,
                    params.reason.as_deref().unwrap_or("no reason given")
                );
            }
            None => debug!(
                "Cancellation for request {} that is not running",
                params.request_id
            ),
        }
    }

    /// Handle list tools request
    async fn handle_list_tools(&self) -> McpResult<Value> {
        self.require_initialized().await?;

        let tools = self.tools.read().await;
        let mut definitions: Vec<Tool> = tools.values().map(|t| t.definition.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(serde_json::to_value(ListToolsResult { tools: definitions })?)
    }

    /// Handle call tool request
    async fn call_tool(&self, params: Option<Value>) -> McpResult<Value> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| McpError::InvalidParameters {
                message: format!("Invalid tool call parameters: {}", e),
            })?;

        let handler = self
            .tools
            .read()
            .await
            .get(&params.name)
            .map(|tool| Arc::clone(&tool.handler))
            .ok_or_else(|| McpError::ToolNotFound {
                name: params.name.clone(),
            })?;

        let tool_name = params.name.clone();
        debug!("Calling tool {}", tool_name);

        let result = match tokio::time::timeout(self.tool_timeout, handler.handle(params)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(McpError::ToolExecutionFailed {
                    tool: tool_name,
                    message: format!("{:#}", e),
                });
            }
            Err(_) => {
                warn!(
                    "Tool {} timed out after {:?}",
                    tool_name, self.tool_timeout
                );
                CallToolResult::error(format!(
                    "Tool '{}' timed out after {} seconds",
                    tool_name,
                    self.tool_timeout.as_secs()
                ))
            }
        };

        Ok(serde_json::to_value(result)?)
    }

    async fn require_initialized(&self) -> McpResult<()> {
        let state = *self.connection_state.read().await;
        match state {
            ConnectionState::Initializing | ConnectionState::Ready => Ok(()),
            ConnectionState::Uninitialized | ConnectionState::Closed => {
                Err(McpError::ServerNotInitialized)
            }
        }
    }
}

fn send(sender: &mpsc::UnboundedSender<JsonRpcMessage>, message: JsonRpcMessage) {
    if sender.send(message).is_err() {
        warn!("Writer is gone, dropping message");
    }
}

/// Serialize messages one per line until every sender is dropped
async fn write_messages<W>(
    mut writer: W,
    mut receiver: mpsc::UnboundedReceiver<JsonRpcMessage>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = receiver.recv().await {
        let json = serde_json::to_string(&message)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
