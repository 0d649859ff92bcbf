//! Control-plane requests and results

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ProcessStatusSnapshot;

/// The four operations the daemon accepts; none take parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandRequest {
    Start,
    Stop,
    Restart,
    Status,
}

impl CommandRequest {
    pub const ALL: [CommandRequest; 4] = [
        CommandRequest::Start,
        CommandRequest::Stop,
        CommandRequest::Restart,
        CommandRequest::Status,
    ];

    /// MCP tool name for this operation
    pub fn tool_name(self) -> &'static str {
        match self {
            CommandRequest::Start => "start_worker",
            CommandRequest::Stop => "stop_worker",
            CommandRequest::Restart => "restart_worker",
            CommandRequest::Status => "get_worker_status",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tool_name() == name)
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// Result of every control-plane operation
///
/// `status` is always serialized; `null` means the worker is not running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub status: Option<ProcessStatusSnapshot>,
    /// Whether anything listens on the worker port; only reported when not running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_in_use: Option<bool>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>, status: Option<ProcessStatusSnapshot>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status,
            port_in_use: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            status: None,
            port_in_use: None,
        }
    }

    pub fn not_running(message: impl Into<String>, port_in_use: bool) -> Self {
        Self {
            success: true,
            message: message.into(),
            status: None,
            port_in_use: Some(port_in_use),
        }
    }
}
