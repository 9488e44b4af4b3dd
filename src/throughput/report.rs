//! Human-readable rendering of session outcomes.

use super::orchestrator::RunReport;
use super::{SessionOutcome, SessionStatus, Transport};
use crate::discovery::Offer;

/// Scale a bit rate into bps / Kbps / Mbps / Gbps.
pub fn format_speed(bits_per_second: f64) -> String {
    if bits_per_second >= 1e9 {
        format!("{:.2} Gbps", bits_per_second / 1e9)
    } else if bits_per_second >= 1e6 {
        format!("{:.2} Mbps", bits_per_second / 1e6)
    } else if bits_per_second >= 1e3 {
        format!("{:.1} Kbps", bits_per_second / 1e3)
    } else {
        format!("{:.0} bps", bits_per_second)
    }
}

pub fn format_offer(offer: &Offer) -> String {
    format!(
        "Received offer from {} (UDP port {}, TCP port {})",
        offer.server, offer.udp_port, offer.tcp_port
    )
}

/// One line per session.
pub fn format_outcome(outcome: &SessionOutcome) -> String {
    let report = match &outcome.status {
        SessionStatus::Completed(report) => report,
        SessionStatus::Failed { reason } => {
            return format!("{} transfer #{} failed: {}", outcome.transport, outcome.id, reason);
        }
    };

    let mut line = format!(
        "{} transfer #{} finished, total time: {:.6} seconds, total speed: {:.0} bits/second ({})",
        report.transport,
        report.id,
        report.elapsed_secs,
        report.bits_per_second,
        format_speed(report.bits_per_second),
    );

    if report.transport == Transport::Udp {
        if let Some(rate) = report.success_rate {
            line.push_str(&format!(
                ", percentage of packets received successfully: {:.2}%",
                rate
            ));
        }
    }

    line
}

pub fn format_run_summary(report: &RunReport) -> String {
    format!(
        "All transfers complete: {} of {} session{} succeeded",
        report.completed(),
        report.sessions.len(),
        if report.sessions.len() == 1 { "" } else { "s" },
    )
}
