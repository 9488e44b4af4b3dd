//! Client-side throughput sessions.
//!
//! A session is one timed transfer over one transport.  [`tcp`] and [`udp`]
//! implement the two session kinds, [`orchestrator`] fans them out against a
//! discovered server, and [`report`] renders their outcomes for humans.

pub mod orchestrator;
pub mod report;
pub mod tcp;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Invalid run parameters, rejected before any session starts.
#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("at least one TCP or UDP session is required")]
    NoSessions,

    #[error("{requested} sessions requested, the limit is {max}")]
    TooManySessions { requested: u64, max: u32 },
}

/// Failure of a single session.  Never propagates beyond that session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("peer closed the connection after {received} of {expected} bytes")]
    PrematureClose { received: u64, expected: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "TCP"),
            Transport::Udp => write!(f, "UDP"),
        }
    }
}

/// Measurements from a session that ran to completion.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// 1-based ordinal within its transport.
    pub id: u32,
    pub transport: Transport,
    /// Bytes requested from the server.
    pub file_size: u64,
    /// Bytes actually counted. For UDP this is 512 per valid segment.
    pub bytes_received: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub bits_per_second: f64,
    /// Delivery percentage; UDP only.
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Completed(SessionReport),
    Failed { reason: String },
}

/// What the orchestrator learned about one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub id: u32,
    pub transport: Transport,
    pub status: SessionStatus,
}

impl SessionOutcome {
    pub fn report(&self) -> Option<&SessionReport> {
        match &self.status {
            SessionStatus::Completed(report) => Some(report),
            SessionStatus::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.report().is_some()
    }
}

/// Wall-clock and monotonic start of a session.
pub(crate) struct SessionClock {
    started_at: DateTime<Utc>,
    start: Instant,
}

impl SessionClock {
    pub(crate) fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the finish timestamp and the monotonic elapsed time.
    pub(crate) fn stop(&self) -> (DateTime<Utc>, Duration) {
        (Utc::now(), self.start.elapsed())
    }
}

/// Throughput in bits per second; zero when no time elapsed.
pub fn bits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / secs
}

/// Delivery percentage, capped at 100.  An empty request counts as fully
/// delivered.
pub fn success_rate(received: u64, requested: u64) -> f64 {
    if requested == 0 {
        return 100.0;
    }
    (received as f64 * 100.0 / requested as f64).min(100.0)
}
