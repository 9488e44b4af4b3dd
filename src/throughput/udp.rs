//! UDP transfer session.
//!
//! Sends one Request packet and counts valid Payload packets until either the
//! requested size is reached or the socket stays silent for the idle timeout.
//! Silence is the completion signal: a server that stopped sending and one
//! that never answered look the same, and both simply lower the delivery
//! percentage.
//!
//! Segment numbers are not used; every valid Payload counts 512 bytes, so
//! duplicates count twice.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use super::{bits_per_second, success_rate, SessionClock, SessionError, SessionReport, Transport};
use crate::config::ClientConfig;
use crate::wire::{Packet, RequestBody, SEGMENT_PAYLOAD_LEN};

/// Large enough for any protocol packet; longer datagrams fail validation.
const RECV_BUF_LEN: usize = 2048;

/// Tunables for a UDP session.
#[derive(Debug, Clone, Copy)]
pub struct UdpSessionOptions {
    /// Silence after which the transfer is treated as finished.
    pub idle_timeout: Duration,
    /// Requested SO_RCVBUF; `0` keeps the OS default.
    pub recv_buffer_bytes: usize,
}

impl Default for UdpSessionOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for UdpSessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            idle_timeout: config.udp_idle_timeout(),
            recv_buffer_bytes: config.udp_recv_buffer_bytes,
        }
    }
}

/// Run one UDP session against `server`.
pub async fn run_udp_session(
    id: u32,
    server: SocketAddr,
    file_size: u64,
    options: &UdpSessionOptions,
) -> Result<SessionReport, SessionError> {
    let socket = bind_session_socket(server, options.recv_buffer_bytes)?;

    let request = Packet::Request(RequestBody { file_size }).encode();
    socket.send_to(&request, server).await?;
    let clock = SessionClock::start();
    debug!(session_id = id, server = %server, file_size, "UDP request sent");

    let mut buf = [0u8; RECV_BUF_LEN];
    let mut received: u64 = 0;
    let mut discarded: u64 = 0;
    while received < file_size {
        match tokio::time::timeout(options.idle_timeout, socket.recv_from(&mut buf)).await {
            Err(_) => {
                debug!(session_id = id, bytes = received, "UDP socket idle, transfer complete");
                break;
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((len, from))) => match Packet::decode(&buf[..len]) {
                Ok(Packet::Payload(_)) => received += SEGMENT_PAYLOAD_LEN as u64,
                Ok(other) => {
                    discarded += 1;
                    trace!(session_id = id, from = %from, message_type = ?other.message_type(), "ignoring non-payload packet");
                }
                Err(e) => {
                    discarded += 1;
                    trace!(session_id = id, from = %from, error = %e, "ignoring invalid datagram");
                }
            },
        }
    }

    let (finished_at, elapsed) = clock.stop();
    let rate = success_rate(received, file_size);
    info!(
        session_id = id,
        bytes = received,
        discarded,
        success_rate = rate,
        elapsed_ms = elapsed.as_millis() as u64,
        "UDP session finished"
    );

    Ok(SessionReport {
        id,
        transport: Transport::Udp,
        file_size,
        bytes_received: received,
        started_at: clock.started_at(),
        finished_at,
        elapsed_secs: elapsed.as_secs_f64(),
        bits_per_second: bits_per_second(received.min(file_size), elapsed),
        success_rate: Some(rate),
    })
}

/// Ephemeral socket in the server's address family with an enlarged receive
/// buffer.  The buffer request is best-effort.
fn bind_session_socket(server: SocketAddr, recv_buffer: usize) -> Result<UdpSocket, SessionError> {
    let (domain, local): (Domain, SocketAddr) = match server {
        SocketAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
        SocketAddr::V6(_) => (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into()),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if recv_buffer > 0 {
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
            warn!(requested = recv_buffer, error = %e, "failed to set UDP receive buffer");
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PayloadBody;

    fn fast_options() -> UdpSessionOptions {
        UdpSessionOptions {
            idle_timeout: Duration::from_millis(300),
            recv_buffer_bytes: 0,
        }
    }

    /// Answer the first request with `reply(file_size)` datagrams.
    async fn scripted_server(reply: fn(u64) -> Vec<Vec<u8>>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let file_size = match Packet::decode(&buf[..len]) {
                Ok(Packet::Request(req)) => req.file_size,
                other => panic!("expected request, got {:?}", other),
            };
            for datagram in reply(file_size) {
                socket.send_to(&datagram, peer).await.unwrap();
            }
        });
        addr
    }

    fn segment(total: u64, number: u64) -> Vec<u8> {
        Packet::Payload(PayloadBody {
            total_segments: total,
            segment_number: number,
        })
        .encode()
        .to_vec()
    }

    #[tokio::test]
    async fn test_counts_every_segment() {
        let addr = scripted_server(|size| {
            let total = crate::wire::segment_count(size);
            (1..=total).map(|n| segment(total, n)).collect()
        })
        .await;

        let report = run_udp_session(1, addr, 5_120, &fast_options()).await.unwrap();
        assert_eq!(report.transport, Transport::Udp);
        assert_eq!(report.bytes_received, 5_120);
        assert_eq!(report.success_rate, Some(100.0));
        assert!(report.bits_per_second > 0.0);
    }

    #[tokio::test]
    async fn test_noise_is_not_counted() {
        let addr = scripted_server(|_| {
            vec![
                segment(4, 1),
                b"garbage".to_vec(),
                Packet::Request(RequestBody { file_size: 1 }).encode().to_vec(),
                segment(4, 2),
            ]
        })
        .await;

        let report = run_udp_session(2, addr, 2_048, &fast_options()).await.unwrap();
        assert_eq!(report.bytes_received, 1_024);
        assert_eq!(report.success_rate, Some(50.0));
    }

    #[tokio::test]
    async fn test_segment_numbers_are_not_deduplicated() {
        let addr = scripted_server(|_| (0..4).map(|_| segment(4, 1)).collect()).await;

        let report = run_udp_session(3, addr, 2_048, &fast_options()).await.unwrap();
        assert_eq!(report.bytes_received, 2_048);
    }

    #[tokio::test]
    async fn test_silent_server_ends_after_idle_timeout() {
        let addr = scripted_server(|_| Vec::new()).await;

        let started = std::time::Instant::now();
        let report = run_udp_session(4, addr, 5_120, &fast_options()).await.unwrap();
        let waited = started.elapsed();

        assert_eq!(report.bytes_received, 0);
        assert_eq!(report.success_rate, Some(0.0));
        assert_eq!(report.bits_per_second, 0.0);
        assert!(waited >= Duration::from_millis(250), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(2), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_zero_size_does_not_wait() {
        let addr = scripted_server(|_| Vec::new()).await;

        let report = run_udp_session(5, addr, 0, &fast_options()).await.unwrap();
        assert_eq!(report.bytes_received, 0);
        assert_eq!(report.success_rate, Some(100.0));
        assert!(report.elapsed_secs < 0.25);
    }

    #[test]
    fn test_options_follow_client_config() {
        let opts = UdpSessionOptions::default();
        assert_eq!(opts.idle_timeout, Duration::from_secs(1));
        assert_eq!(opts.recv_buffer_bytes, 4 * 1024 * 1024);
    }
}
