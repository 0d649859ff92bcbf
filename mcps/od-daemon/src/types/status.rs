//! Process telemetry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LifecycleState;

/// Raw per-process numbers read from the OS process table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub pid: u32,
    /// CPU usage over the sampling window (may exceed 100 on multi-core)
    pub cpu_percent: f32,
    /// Resident memory in bytes
    pub memory_bytes: u64,
    /// Process start time, unix seconds
    pub started_at_unix: u64,
    /// Live descendants (recursive)
    pub child_process_count: usize,
}

/// Point-in-time view of the worker, built from a fresh process-table read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatusSnapshot {
    pub pid: u32,
    pub state: LifecycleState,
    pub started_at: DateTime<Utc>,
    /// Human-readable uptime (e.g., "1 hour, 5 minutes")
    pub uptime: String,
    pub uptime_secs: u64,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub child_process_count: usize,
    pub port: u16,
    pub adopted: bool,
}

/// Format uptime seconds into human-readable string
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{} day{}", days, if days == 1 { "" } else { "s" }));
    }
    if hours > 0 {
        parts.push(format!("{} hour{}", hours, if hours == 1 { "" } else { "s" }));
    }
    if minutes > 0 {
        parts.push(format!(
            "{} minute{}",
            minutes,
            if minutes == 1 { "" } else { "s" }
        ));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{} second{}", secs, if secs == 1 { "" } else { "s" }));
    }

    parts.join(", ")
}

/// Bytes to mebibytes, rounded to two decimals
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}
