use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sysinfo::{ProcessesToUpdate, System};
use time::OffsetDateTime;

use crate::observability::MESSAGES_SENT;
use crate::utils::time::{format_uptime, rfc3339};

/// Process-wide counters.
#[derive(Debug)]
pub struct Stats {
    total_sent: AtomicU64,
    started: Instant,
    started_at: OffsetDateTime,
}

impl Stats {
    /// Starts the clock.
    pub fn new() -> Self {
        Self {
            total_sent: AtomicU64::new(0),
            started: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Count one chat line delivered to a server.
    pub fn record_sent(&self) {
        MESSAGES_SENT.click();
        self.total_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Lines delivered since startup.
    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    /// Time since startup.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wall-clock startup time.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view for `/stats` and the activity log.
#[derive(Clone, Debug, PartialEq)]
pub struct StatsSnapshot {
    /// Sessions currently connected.
    pub connected: usize,
    /// Sessions in the roster.
    pub sessions: usize,
    /// Lines delivered since startup.
    pub total_sent: u64,
    /// Time since startup.
    pub uptime: Duration,
    /// Resident memory of this process, when the platform reports it.
    pub memory_bytes: Option<u64>,
}

impl StatsSnapshot {
    /// Resident memory in MiB.
    pub fn memory_mb(&self) -> Option<f64> {
        self.memory_bytes
            .map(|bytes| bytes as f64 / (1024.0 * 1024.0))
    }

    /// One activity log line, stamped with `at`.
    pub fn activity_line(&self, at: OffsetDateTime) -> String {
        format!(
            "[{}] Connected servers: {}/{}, Total messages: {}",
            rfc3339(at),
            self.connected,
            self.sessions,
            self.total_sent
        )
    }

    /// The lines printed by `/stats`.
    pub fn report_lines(&self) -> Vec<String> {
        let memory = self
            .memory_mb()
            .map(|mb| format!("{mb:.2} MB"))
            .unwrap_or_else(|| "unknown".to_string());
        vec![
            "Bot statistics:".to_string(),
            format!("  Connected servers: {}/{}", self.connected, self.sessions),
            format!("  Total messages sent: {}", self.total_sent),
            format!("  Uptime: {}", format_uptime(self.uptime)),
            format!("  Memory usage: {memory}"),
        ]
    }
}

/// Resident set size of the current process.
pub fn resident_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
    system.process(pid).map(sysinfo::Process::memory)
}
