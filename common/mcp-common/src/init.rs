//! Server initialization utilities
//!
//! Provides standardized tracing setup and the transports the servers in
//! this workspace are served over: stdio for a single client session, and a
//! TCP listener (normally loopback) that serves one MCP session per
//! accepted connection.

use std::future::Future;
use std::time::Duration;

use rmcp::{ServerHandler, ServiceExt};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pause after a failed accept so fd exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Initialize tracing/logging for MCP servers
///
/// Sets up logging to stderr (stdout is reserved for the MCP protocol when
/// serving over stdio) with:
/// - Formatted output without ANSI colors (for clean logs)
/// - Environment-based filtering via RUST_LOG
/// - A default directive of `<crate_name>=<default_level>`
///
/// Set `LOG_FORMAT=json` for structured JSON output (useful for production/log aggregation).
/// Default is human-readable text output.
///
/// # Example
///
/// ```rust,ignore
/// mcp_common::init_tracing("od_daemon", "info")?;
/// ```
pub fn init_tracing(crate_name: &str, default_level: &str) -> anyhow::Result<()> {
    let directive = format!("{}={}", crate_name, default_level);
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }

    Ok(())
}

/// Serve a single MCP session over stdio and wait for it to end
pub async fn serve_stdio<S>(server: S) -> anyhow::Result<()>
where
    S: ServerHandler,
{
    tracing::info!("Serving MCP over stdio");

    let service = server.serve(rmcp::transport::stdio()).await?;

    tracing::info!("Server running, waiting for requests...");
    service.waiting().await?;

    tracing::info!("Server shutting down");
    Ok(())
}

/// Serve MCP sessions over a TCP listener until `shutdown` resolves
///
/// Every accepted connection gets its own clone of `server` and runs as an
/// independent session task, so a slow client never blocks the accept loop.
/// Sessions still in flight when shutdown fires are left to finish on the
/// runtime.
pub async fn serve_tcp<S, F>(server: S, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    S: ServerHandler + Clone,
    F: Future,
{
    let local_addr = listener.local_addr()?;
    tracing::info!("MCP server listening on {}", local_addr);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let server = server.clone();
                        tokio::spawn(async move {
                            tracing::debug!("Session opened: {}", peer);
                            match server.serve(stream).await {
                                Ok(service) => {
                                    if let Err(e) = service.waiting().await {
                                        tracing::warn!("Session {} ended abnormally: {}", peer, e);
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Session {} failed to initialize: {}", peer, e);
                                }
                            }
                            tracing::debug!("Session closed: {}", peer);
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, no longer accepting sessions");
                break;
            }
        }
    }

    Ok(())
}
