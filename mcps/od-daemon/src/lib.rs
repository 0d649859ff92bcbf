//! od-daemon Library
//!
//! Supervises one long-running worker process (by default the `zzz_mcp`
//! Python server) and exposes start, stop, restart and status as MCP tools.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use od_daemon::{Config, OdDaemonServer, Supervisor};
//!
//! let supervisor = Supervisor::from_config(&Config::default());
//! let result = supervisor.start().await;
//! println!("{}", result.message);
//!
//! // Or wrap it as an MCP server and serve it
//! let server = OdDaemonServer::new(supervisor);
//! ```
//!
//! # Usage as Binary
//!
//! Run directly: `od-daemon`, then `od-daemon status` from another shell.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod probe;
pub mod process;
pub mod server;
pub mod supervisor;
pub mod types;

pub use client::DaemonClient;
pub use config::Config;
pub use error::{ConfigError, LaunchError, SupervisorError};
pub use server::OdDaemonServer;
pub use supervisor::{Supervisor, SupervisorSettings};
pub use types::{
    CommandRequest, CommandResult, LifecycleState, ManagedProcessHandle, ProcessStatusSnapshot,
    WorkerAddress,
};

// Re-export EmbeddableMcp trait for in-process usage
pub use mcp_common::{EmbeddableError, EmbeddableMcp, EmbeddableResult};
