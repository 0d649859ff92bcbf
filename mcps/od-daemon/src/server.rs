//! MCP Server exposing the worker control plane

use mcp_common::{
    async_trait, expect_no_params, json_failure, json_success, EmbeddableError, EmbeddableMcp,
    EmbeddableResult, McpError,
};
use rmcp::{
    handler::server::router::tool::ToolRouter,
    model::{CallToolResult, ServerCapabilities, ServerInfo, Tool},
    tool, tool_handler, tool_router,
};
use serde_json::Value;

use crate::supervisor::Supervisor;
use crate::types::{CommandRequest, CommandResult};

const INSTRUCTIONS: &str = "Worker supervisor daemon - starts, stops, restarts and reports on \
     a single long-running worker process. Every tool returns \
     {success, message, status}; status is null when the worker is not running.";

/// The od-daemon MCP server
///
/// Clones share one [`Supervisor`], so every session sees the same worker.
#[derive(Clone)]
pub struct OdDaemonServer {
    supervisor: Supervisor,
    tool_router: ToolRouter<Self>,
}

/// Map a lifecycle result onto the MCP tool result
///
/// The payload is the same either way; a failed operation also sets
/// `is_error` so generic MCP clients notice.
fn to_tool_result(result: &CommandResult) -> Result<CallToolResult, McpError> {
    if result.success {
        json_success(result)
    } else {
        json_failure(result)
    }
}

// ============================================================================
// Tool Router Implementation
// ============================================================================

#[tool_router]
impl OdDaemonServer {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            tool_router: Self::tool_router(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Run one control-plane command directly, bypassing MCP framing
    pub async fn execute(&self, command: CommandRequest) -> CommandResult {
        tracing::info!("Handling {}", command);
        match command {
            CommandRequest::Start => self.supervisor.start().await,
            CommandRequest::Stop => self.supervisor.stop().await,
            CommandRequest::Restart => self.supervisor.restart().await,
            CommandRequest::Status => self.supervisor.status().await,
        }
    }

    #[tool(
        description = "Start the worker process and wait until it accepts connections. Succeeds without changes if it is already running"
    )]
    async fn start_worker(&self) -> Result<CallToolResult, McpError> {
        to_tool_result(&self.execute(CommandRequest::Start).await)
    }

    #[tool(
        description = "Stop the worker and all processes it spawned, gracefully first and forcibly after a grace period. Succeeds if it is not running"
    )]
    async fn stop_worker(&self) -> Result<CallToolResult, McpError> {
        to_tool_result(&self.execute(CommandRequest::Stop).await)
    }

    #[tool(
        description = "Stop the worker completely, wait for its port to be released, then start it again"
    )]
    async fn restart_worker(&self) -> Result<CallToolResult, McpError> {
        to_tool_result(&self.execute(CommandRequest::Restart).await)
    }

    #[tool(
        description = "Get the worker's pid, uptime, CPU percent, memory in MB, child process count and port, measured live"
    )]
    async fn get_worker_status(&self) -> Result<CallToolResult, McpError> {
        to_tool_result(&self.execute(CommandRequest::Status).await)
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for OdDaemonServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ============================================================================
// EmbeddableMcp Implementation
// ============================================================================

#[async_trait]
impl EmbeddableMcp for OdDaemonServer {
    fn server_name(&self) -> &str {
        "od-daemon"
    }

    fn server_description(&self) -> Option<&str> {
        Some(INSTRUCTIONS)
    }

    fn list_tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    async fn call_tool(&self, name: &str, params: Value) -> EmbeddableResult<CallToolResult> {
        let command = CommandRequest::from_tool_name(name)
            .ok_or_else(|| EmbeddableError::ToolNotFound(name.to_string()))?;
        expect_no_params(name, &params)?;
        to_tool_result(&self.execute(command).await).map_err(Into::into)
    }
}
