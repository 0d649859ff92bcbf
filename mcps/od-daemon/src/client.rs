//! Client for a running od-daemon
//!
//! Opens one MCP session over TCP per command, calls the matching tool and
//! decodes the JSON payload back into a [`CommandResult`].

use std::time::Duration;

use anyhow::{Context, Result};
use rmcp::{
    model::{CallToolRequestParam, CallToolResult},
    ServiceExt,
};
use tokio::net::TcpStream;

use crate::types::{CommandRequest, CommandResult};

/// How long to wait for the daemon to accept the connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the daemon at `host:port`
#[derive(Debug, Clone)]
pub struct DaemonClient {
    host: String,
    port: u16,
}

impl DaemonClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Run `command` on the daemon and return its result
    ///
    /// Lifecycle failures come back as `Ok` with `success: false`; `Err` is
    /// reserved for not reaching the daemon or a malformed reply.
    pub async fn call(&self, command: CommandRequest) -> Result<CommandResult> {
        let stream = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .with_context(|| format!("Timed out connecting to od-daemon at {}:{}", self.host, self.port))?
        .with_context(|| {
            format!(
                "Failed to connect to od-daemon at {}:{} (is it running?)",
                self.host, self.port
            )
        })?;

        let service = ()
            .serve(stream)
            .await
            .context("Failed to initialize MCP session with od-daemon")?;

        tracing::debug!("Calling {} on {}:{}", command, self.host, self.port);
        let response = service
            .call_tool(CallToolRequestParam {
                name: command.tool_name().into(),
                arguments: None,
                task: None,
            })
            .await
            .with_context(|| format!("Failed to call {}", command));

        if let Err(e) = service.cancel().await {
            tracing::warn!("Error closing od-daemon session: {}", e);
        }

        command_result_from_tool(&response?)
    }
}

/// Decode the JSON text content of a tool result
pub fn command_result_from_tool(result: &CallToolResult) -> Result<CommandResult> {
    let text = result
        .content
        .first()
        .and_then(|c| {
            if let rmcp::model::RawContent::Text(text) = &c.raw {
                Some(text.text.as_str())
            } else {
                None
            }
        })
        .context("No text content in response")?;

    serde_json::from_str(text).context("Failed to parse od-daemon response")
}
