//! The measurement server.
//!
//! [`ReflectorServer`] owns three sockets for its lifetime: a TCP listener and
//! a UDP socket on OS-assigned ports, and a broadcast socket advertising both.
//! [`ReflectorServer::run`] drives the offer broadcaster, a TCP accept loop and
//! a UDP receive loop concurrently.  Each accepted connection and each valid
//! UDP request is served by its own task, so neither loop waits on a transfer.

pub mod tcp_stream;
pub mod udp_segments;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::config::BeaconConfig;
use crate::discovery::OfferBroadcaster;
use crate::wire::{OfferBody, Packet};

/// Receive buffer for the request socket. Anything longer than a protocol
/// packet fails validation anyway.
const REQUEST_BUF_LEN: usize = 2048;

/// Failure while serving one TCP connection.
#[derive(Debug, Error)]
pub enum ReflectorError {
    #[error("size line longer than {max} bytes")]
    SizeLineTooLong { max: usize },

    #[error("malformed size line {line:?}")]
    MalformedSize { line: String },

    #[error("connection closed before a size line was received")]
    MissingSizeLine,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// ReflectorServer
// ---------------------------------------------------------------------------

/// A bound, not yet running, measurement server.
pub struct ReflectorServer {
    tcp_listener: TcpListener,
    udp_socket: Arc<UdpSocket>,
    broadcaster: OfferBroadcaster,
    write_chunk: usize,
}

impl ReflectorServer {
    /// Bind every socket the server needs.  Any failure here is fatal.
    pub async fn bind(config: &BeaconConfig) -> Result<Self> {
        let tcp_bind = config.server.tcp_bind();
        let tcp_listener = TcpListener::bind(tcp_bind)
            .await
            .with_context(|| format!("failed to bind TCP listener on {}", tcp_bind))?;

        let udp_bind = config.server.udp_bind();
        let udp_socket = UdpSocket::bind(udp_bind)
            .await
            .with_context(|| format!("failed to bind UDP socket on {}", udp_bind))?;

        let offer = OfferBody {
            udp_port: udp_socket.local_addr()?.port(),
            tcp_port: tcp_listener.local_addr()?.port(),
        };
        let broadcaster = OfferBroadcaster::bind(&config.discovery, offer).await?;

        info!(
            udp_port = offer.udp_port,
            tcp_port = offer.tcp_port,
            "reflector sockets bound"
        );

        Ok(Self {
            tcp_listener,
            udp_socket: Arc::new(udp_socket),
            broadcaster,
            write_chunk: config.server.write_chunk_bytes,
        })
    }

    /// Ports advertised in every offer.
    pub fn offer(&self) -> OfferBody {
        OfferBody {
            udp_port: self.udp_port(),
            tcp_port: self.tcp_port(),
        }
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default()
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default()
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        self.broadcaster.target()
    }

    /// Serve until the process exits.
    pub async fn run(self) {
        let Self {
            tcp_listener,
            udp_socket,
            broadcaster,
            write_chunk,
        } = self;

        tokio::join!(
            broadcaster.run(),
            accept_loop(tcp_listener, write_chunk),
            receive_loop(udp_socket),
        );
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Accept TCP connections forever, one task per connection.
async fn accept_loop(listener: TcpListener, write_chunk: usize) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "failed to accept TCP connection");
                continue;
            }
        };

        debug!(peer = %peer, "accepted TCP connection");

        tokio::spawn(async move {
            match tcp_stream::serve_connection(stream, write_chunk).await {
                Ok(bytes) => info!(peer = %peer, bytes, "TCP transfer served"),
                Err(e) => warn!(peer = %peer, error = %e, "TCP transfer failed"),
            }
        });
    }
}

/// Receive UDP requests forever, one task per valid request.
///
/// Handlers share the socket for sending only; this loop is its sole reader.
async fn receive_loop(socket: Arc<UdpSocket>) {
    let mut buf = [0u8; REQUEST_BUF_LEN];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP receive failed");
                continue;
            }
        };

        match Packet::decode(&buf[..len]) {
            Ok(Packet::Request(req)) => {
                debug!(peer = %peer, file_size = req.file_size, "UDP request received");
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    match udp_segments::serve_request(&socket, peer, req.file_size).await {
                        Ok(segments) => info!(peer = %peer, segments, "UDP transfer served"),
                        Err(e) => warn!(peer = %peer, error = %e, "UDP transfer aborted"),
                    }
                });
            }
            Ok(other) => {
                debug!(peer = %peer, message_type = ?other.message_type(), "ignoring unexpected packet");
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "discarding invalid datagram");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use crate::discovery::OfferListener;
    use crate::wire::RequestBody;

    async fn loopback_server(discovery_port: u16) -> ReflectorServer {
        let mut config = BeaconConfig::default();
        config.server.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.discovery.broadcast_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.discovery.port = discovery_port;
        ReflectorServer::bind(&config).await.expect("bind reflector")
    }

    #[tokio::test]
    async fn test_bind_assigns_ports() {
        let server = loopback_server(9).await;
        assert_ne!(server.tcp_port(), 0);
        assert_ne!(server.udp_port(), 0);
        assert_eq!(server.offer().tcp_port, server.tcp_port());
        assert_eq!(server.broadcast_target().port(), 9);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = BeaconConfig::default();
        config.server.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.server.tcp_port = taken.local_addr().unwrap().port();

        assert!(ReflectorServer::bind(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_advertises_its_ports() {
        let listener = OfferListener::bind(0).unwrap();
        let server = loopback_server(listener.local_port().unwrap()).await;
        let expected = server.offer();
        let task = tokio::spawn(server.run());

        let offer = tokio::time::timeout(Duration::from_secs(2), listener.next_offer())
            .await
            .expect("offer within timeout")
            .unwrap();
        assert_eq!(offer.udp_port, expected.udp_port);
        assert_eq!(offer.tcp_port, expected.tcp_port);

        task.abort();
    }

    #[tokio::test]
    async fn test_invalid_datagrams_do_not_stop_receive_loop() {
        let server = loopback_server(9).await;
        let udp_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, server.udp_port()));
        let task = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"noise", udp_addr).await.unwrap();
        client
            .send_to(&Packet::Offer(OfferBody { udp_port: 1, tcp_port: 2 }).encode(), udp_addr)
            .await
            .unwrap();
        client
            .send_to(&Packet::Request(RequestBody { file_size: 1024 }).encode(), udp_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        for _ in 0..2 {
            let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
                .await
                .expect("segment within timeout")
                .unwrap();
            assert!(matches!(Packet::decode(&buf[..len]), Ok(Packet::Payload(_))));
        }

        task.abort();
    }
}
