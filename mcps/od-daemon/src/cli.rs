//! Command line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::types::CommandRequest;

#[derive(Parser, Debug)]
#[command(name = "od-daemon")]
#[command(about = "Supervisor daemon for a single long-running worker process")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(long, short, global = true, env = "OD_DAEMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Daemon host, overrides the config file
    #[arg(long, global = true, env = "OD_DAEMON_HOST")]
    pub host: Option<String>,

    /// Daemon port, overrides the config file
    #[arg(long, global = true, env = "OD_DAEMON_PORT")]
    pub port: Option<u16>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon (the default when no subcommand is given)
    Serve(ServeArgs),
    /// Ask a running daemon to start the worker
    Start(ClientArgs),
    /// Ask a running daemon to stop the worker
    Stop(ClientArgs),
    /// Ask a running daemon to restart the worker
    Restart(ClientArgs),
    /// Show the worker's status
    Status(ClientArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Serve a single MCP session on stdio instead of listening on TCP
    #[arg(long)]
    pub stdio: bool,

    /// Worker port, overrides the config file
    #[arg(long)]
    pub worker_port: Option<u16>,

    /// Worker program, overrides the config file
    #[arg(long)]
    pub worker_program: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct ClientArgs {
    /// Print the raw JSON result
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Log level implied by `-v`
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Apply command line overrides on top of the loaded file
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.daemon.host = host.clone();
        }
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
        if let Some(Commands::Serve(serve)) = &self.command {
            if let Some(port) = serve.worker_port {
                config.worker.port = port;
            }
            if let Some(program) = &serve.worker_program {
                config.worker.program = program.clone();
            }
        }
    }
}

impl Commands {
    /// The control-plane request for client subcommands, `None` for `serve`
    pub fn request(&self) -> Option<(CommandRequest, &ClientArgs)> {
        match self {
            Commands::Serve(_) => None,
            Commands::Start(args) => Some((CommandRequest::Start, args)),
            Commands::Stop(args) => Some((CommandRequest::Stop, args)),
            Commands::Restart(args) => Some((CommandRequest::Restart, args)),
            Commands::Status(args) => Some((CommandRequest::Status, args)),
        }
    }
}
