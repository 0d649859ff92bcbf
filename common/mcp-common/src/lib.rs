//! MCP Common - Shared utilities for MCP servers
//!
//! This crate provides the plumbing every MCP server in the workspace needs:
//!
//! - **Initialization**: [`init_tracing`] plus [`serve_stdio`] / [`serve_tcp`]
//!   for running a server over stdio or a loopback TCP listener
//! - **Results**: Helper functions for creating `CallToolResult` responses
//! - **Errors**: Traits for converting errors to MCP-compatible format
//! - **Embeddable**: [`EmbeddableMcp`] trait for in-process execution
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_common::{init_tracing, json_success, serve_tcp};
//!
//! init_tracing("my_mcp", "info")?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:23002").await?;
//! serve_tcp(MyServer::new(), listener, tokio::signal::ctrl_c()).await?;
//! ```

pub mod embeddable;
pub mod error;
pub mod init;
pub mod result;

// Re-export commonly used items at crate root
pub use embeddable::{expect_no_params, EmbeddableError, EmbeddableMcp, EmbeddableResult};
pub use error::{IntoMcpError, ResultExt};
pub use init::{init_tracing, serve_stdio, serve_tcp};
pub use result::{json_failure, json_success, text_success};

// Re-export rmcp types that are commonly needed
pub use rmcp::{
    model::{CallToolResult, Content, Tool},
    ErrorData as McpError,
};

// Re-export async_trait for implementing EmbeddableMcp
pub use async_trait::async_trait;
