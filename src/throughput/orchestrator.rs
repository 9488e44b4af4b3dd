//! Fan-out of TCP and UDP sessions against one discovered server.

use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::tcp::run_tcp_session;
use super::udp::{run_udp_session, UdpSessionOptions};
use super::{SessionError, SessionOutcome, SessionReport, SessionStatus, ThroughputError, Transport};
use crate::config::{BeaconConfig, ClientConfig};
use crate::discovery::{self, Offer};

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunParams {
    pub file_size: u64,
    pub tcp_sessions: u32,
    pub udp_sessions: u32,
}

impl RunParams {
    pub fn total_sessions(&self) -> u64 {
        self.tcp_sessions as u64 + self.udp_sessions as u64
    }

    pub fn validate(&self, max_sessions: u32) -> Result<(), ThroughputError> {
        let requested = self.total_sessions();
        if requested == 0 {
            return Err(ThroughputError::NoSessions);
        }
        if requested > max_sessions as u64 {
            return Err(ThroughputError::TooManySessions {
                requested,
                max: max_sessions,
            });
        }
        Ok(())
    }
}

/// Result of one round: the offer that was used and every session's outcome,
/// TCP sessions first, each group in id order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub offer: Offer,
    pub params: RunParams,
    pub sessions: Vec<SessionOutcome>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.sessions.len() - self.completed()
    }
}

/// Validate, discover a server, and run every session against it.
pub async fn run(params: RunParams, config: &BeaconConfig) -> Result<RunReport> {
    params.validate(config.client.max_sessions)?;
    let offer = discovery::discover(config.discovery.port).await?;
    Ok(run_with_offer(offer, params, &config.client).await)
}

/// Run every session against an already known server.
pub async fn run_with_offer(offer: Offer, params: RunParams, client: &ClientConfig) -> RunReport {
    let run_id = Uuid::new_v4();
    info!(
        run_id = %run_id,
        server = %offer.server,
        file_size = params.file_size,
        tcp_sessions = params.tcp_sessions,
        udp_sessions = params.udp_sessions,
        "starting transfers"
    );

    let sessions = run_sessions(&offer, &params, client).await;
    let report = RunReport {
        run_id,
        offer,
        params,
        sessions,
    };

    info!(
        run_id = %run_id,
        completed = report.completed(),
        failed = report.failed(),
        "all transfers finished"
    );
    report
}

/// Spawn `tcp_sessions + udp_sessions` independent tasks and wait for all.
///
/// A failed or panicked session becomes a failed outcome; its siblings keep
/// running.
pub async fn run_sessions(
    offer: &Offer,
    params: &RunParams,
    client: &ClientConfig,
) -> Vec<SessionOutcome> {
    let mut handles: Vec<(u32, Transport, JoinHandle<Result<SessionReport, SessionError>>)> =
        Vec::with_capacity(params.total_sessions() as usize);

    let tcp_addr = offer.tcp_addr();
    let read_chunk = client.tcp_read_chunk_bytes;
    for id in 1..=params.tcp_sessions {
        let file_size = params.file_size;
        let handle =
            tokio::spawn(async move { run_tcp_session(id, tcp_addr, file_size, read_chunk).await });
        handles.push((id, Transport::Tcp, handle));
    }

    let udp_addr = offer.udp_addr();
    let udp_options = UdpSessionOptions::from(client);
    for id in 1..=params.udp_sessions {
        let file_size = params.file_size;
        let handle =
            tokio::spawn(async move { run_udp_session(id, udp_addr, file_size, &udp_options).await });
        handles.push((id, Transport::Udp, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (id, transport, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(SessionError::Aborted(join_err.to_string())),
        };

        let status = match result {
            Ok(report) => SessionStatus::Completed(report),
            Err(e) => {
                warn!(session_id = id, transport = %transport, error = %e, "session failed");
                SessionStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        outcomes.push(SessionOutcome {
            id,
            transport,
            status,
        });
    }

    outcomes
}
