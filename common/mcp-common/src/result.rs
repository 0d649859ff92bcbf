//! Result helpers for MCP tool responses
//!
//! Provides convenient functions for creating `CallToolResult` responses,
//! reducing boilerplate in tool implementations.

use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

use crate::error::ResultExt;

/// Create a successful JSON response from any serializable data
///
/// Replaces the common pattern of pretty-printing with `serde_json`, mapping
/// the error and wrapping the text in `CallToolResult::success`.
///
/// ```rust,ignore
/// fn my_tool(&self) -> Result<CallToolResult, McpError> {
///     json_success(&MyData { value: 42 })
/// }
/// ```
pub fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data).to_mcp_err()?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Create a JSON response flagged as a tool-level failure
///
/// The payload is still delivered to the client (the call itself worked);
/// `is_error` tells the caller the requested operation did not succeed.
pub fn json_failure<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data).to_mcp_err()?;
    Ok(CallToolResult::error(vec![Content::text(json)]))
}

/// Create a successful plain text response
pub fn text_success(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}
