//! Readiness probing and bounded polling
//!
//! A pid existing is not proof the worker can take requests; readiness means
//! its endpoint accepts connections. All waits here are bounded by an
//! explicit budget.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::types::WorkerAddress;

/// Reachability check for the worker endpoint
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Whether something accepts connections at `address`
    async fn is_ready(&self, address: &WorkerAddress) -> bool;
}

/// [`ReadinessProbe`] that opens (and immediately drops) a TCP connection
#[derive(Debug, Clone)]
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn is_ready(&self, address: &WorkerAddress) -> bool {
        let connect = TcpStream::connect((address.host.as_str(), address.port));
        matches!(
            tokio::time::timeout(self.connect_timeout, connect).await,
            Ok(Ok(_))
        )
    }
}

/// Interval and overall budget of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }
}

/// Poll `check` until it returns true or the budget runs out
///
/// `check` runs at least once, even with a zero budget.
pub async fn poll_until<F, Fut>(policy: PollPolicy, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + policy.budget;
    loop {
        if check().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }
}

/// How a readiness wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32 },
    /// The process died while we were waiting
    Exited { attempts: u32 },
    TimedOut { attempts: u32 },
}

/// Probe `address` until ready, the process dies, or the budget runs out
///
/// `still_alive` is checked after every failed probe so a worker that
/// crashes on startup fails fast instead of burning the whole budget.
pub async fn wait_until_ready<F, Fut>(
    probe: &dyn ReadinessProbe,
    address: &WorkerAddress,
    policy: PollPolicy,
    mut still_alive: F,
) -> ProbeOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + policy.budget;
    let mut attempts = 0;
    loop {
        attempts += 1;
        if probe.is_ready(address).await {
            return ProbeOutcome::Ready { attempts };
        }
        if !still_alive().await {
            return ProbeOutcome::Exited { attempts };
        }
        let now = Instant::now();
        if now >= deadline {
            return ProbeOutcome::TimedOut { attempts };
        }
        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }
}
