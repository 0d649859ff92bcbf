//! od-daemon - worker supervisor daemon
//!
//! # Usage
//!
//! Run the daemon: `od-daemon` (or `od-daemon serve`)
//!
//! Control a running daemon:
//! ```text
//! od-daemon start | stop | restart | status [--json]
//! ```
//!
//! Or configure it as an MCP server in `.mcp.json`:
//! ```json
//! { "mcpServers": { "od-daemon": { "command": "./od-daemon", "args": ["serve", "--stdio"] } } }
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use od_daemon::cli::{Cli, ClientArgs, Commands, ServeArgs};
use od_daemon::{
    CommandRequest, CommandResult, Config, DaemonClient, EmbeddableMcp, OdDaemonServer, Supervisor,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    mcp_common::init_tracing("od_daemon", cli.log_level())?;

    let (mut config, source) = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    match &source {
        Some(path) => tracing::debug!("Loaded configuration from {}", path.display()),
        None => tracing::debug!("No configuration file found, using defaults"),
    }

    match cli.command.as_ref().and_then(|c| c.request()) {
        Some((request, args)) => run_client(&config, request, args).await,
        None => {
            let default_args = ServeArgs::default();
            let args = match &cli.command {
                Some(Commands::Serve(args)) => args,
                _ => &default_args,
            };
            serve(config, args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: Config, args: &ServeArgs) -> Result<()> {
    let supervisor = Supervisor::from_config(&config);
    let server = OdDaemonServer::new(supervisor.clone());

    tracing::info!(
        "Supervising `{}` on {}",
        supervisor.settings().launch.command_line().join(" "),
        supervisor.settings().address
    );
    let tools: Vec<String> = server.list_tools().iter().map(|t| t.name.to_string()).collect();
    tracing::info!("Tools: {}", tools.join(", "));

    // Pick up a worker that outlived a previous daemon before taking requests
    let initial = supervisor.status().await;
    tracing::info!("{}", initial.message);

    if args.stdio {
        mcp_common::serve_stdio(server).await?;
    } else {
        let bind = format!("{}:{}", config.daemon.host, config.daemon.port);
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("Failed to bind od-daemon to {}", bind))?;
        mcp_common::serve_tcp(server, listener, shutdown_signal()).await?;
    }

    if config.daemon.stop_worker_on_exit {
        let result = supervisor.stop().await;
        tracing::info!("{}", result.message);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_client(config: &Config, request: CommandRequest, args: &ClientArgs) -> Result<ExitCode> {
    let client = DaemonClient::new(config.daemon.host.clone(), config.daemon.port);
    let result = client.call(request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_result(result: &CommandResult) {
    println!("{}", result.message);
    if let Some(status) = &result.status {
        println!("  pid:       {}", status.pid);
        println!("  state:     {}", status.state);
        println!("  uptime:    {}", status.uptime);
        println!("  cpu:       {:.1}%", status.cpu_percent);
        println!("  memory:    {:.2} MB", status.memory_mb);
        println!("  children:  {}", status.child_process_count);
        println!("  port:      {}", status.port);
        if status.adopted {
            println!("  adopted:   yes");
        }
    }
}
