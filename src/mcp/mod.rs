//! MCP (Model Context Protocol) Server Implementation
//!
//! JSON-RPC 2.0 over stdio, exposing the document store and GitHub as tools.


pub mod errors;
pub mod protocol;
pub mod server;
pub mod tools;

pub use errors::{McpError, McpResult};
pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::register_tools;
