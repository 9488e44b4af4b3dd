//! Server discovery over broadcast UDP.
//!
//! The reflector runs an [`OfferBroadcaster`] that sends an Offer packet to the
//! broadcast address once per interval.  A client binds the well-known
//! discovery port with an [`OfferListener`] and waits, without a timeout, for
//! the first valid Offer.  Anything else arriving on the port is logged and
//! skipped.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::wire::{OfferBody, Packet};

/// Receive buffer for discovery datagrams. Oversized datagrams are truncated
/// and then fail length validation.
const DISCOVERY_BUF_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// Offer
// ---------------------------------------------------------------------------

/// A discovered server: where it is and which ports it serves transfers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Offer {
    /// Source address of the offer datagram.
    pub server: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl Offer {
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server, self.udp_port)
    }
}

// ---------------------------------------------------------------------------
// OfferBroadcaster
// ---------------------------------------------------------------------------

/// Periodically advertises the reflector's transfer ports.
pub struct OfferBroadcaster {
    socket: UdpSocket,
    target: SocketAddr,
    interval: Duration,
    packet: Bytes,
}

impl OfferBroadcaster {
    /// Bind a broadcast-enabled socket for advertising `offer`.
    pub async fn bind(config: &DiscoveryConfig, offer: OfferBody) -> Result<Self> {
        let target = config.broadcast_target();
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(local)
            .await
            .with_context(|| format!("failed to bind broadcast socket on {}", local))?;
        socket
            .set_broadcast(true)
            .context("failed to enable SO_BROADCAST")?;

        Ok(Self {
            socket,
            target,
            interval: config.interval(),
            packet: Packet::Offer(offer).encode(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send the offer every interval, forever.
    ///
    /// A failed send is logged; the next tick tries again.
    pub async fn run(self) {
        info!(
            dest = %self.target,
            interval_ms = self.interval.as_millis() as u64,
            "broadcasting offers"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.socket.send_to(&self.packet, self.target).await {
                Ok(_) => trace!(dest = %self.target, "offer sent"),
                Err(e) => warn!(dest = %self.target, error = %e, "failed to send offer"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OfferListener
// ---------------------------------------------------------------------------

/// Client-side listener bound to the discovery port on all interfaces.
pub struct OfferListener {
    socket: UdpSocket,
}

impl OfferListener {
    /// Bind `0.0.0.0:port` with `SO_REUSEADDR` so several clients on one host
    /// can listen at once.  Must be called from within a tokio runtime.
    pub fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("failed to create discovery socket")?;
        socket
            .set_reuse_address(true)
            .context("failed to set SO_REUSEADDR on discovery socket")?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("failed to bind discovery port {}", addr))?;

        let socket = UdpSocket::from_std(socket.into())
            .context("failed to register discovery socket with the runtime")?;

        debug!(addr = %addr, "listening for offers");
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Wait for the first valid Offer.  Blocks indefinitely if none arrives.
    pub async fn next_offer(&self) -> Result<Offer> {
        let mut buf = [0u8; DISCOVERY_BUF_LEN];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("discovery receive failed")?;

            match Packet::decode(&buf[..len]) {
                Ok(Packet::Offer(body)) => {
                    let offer = Offer {
                        server: from.ip(),
                        udp_port: body.udp_port,
                        tcp_port: body.tcp_port,
                    };
                    info!(
                        server = %offer.server,
                        udp_port = offer.udp_port,
                        tcp_port = offer.tcp_port,
                        "received offer"
                    );
                    return Ok(offer);
                }
                Ok(other) => {
                    warn!(
                        from = %from,
                        message_type = ?other.message_type(),
                        "ignoring non-offer packet on discovery port"
                    );
                }
                Err(e) => {
                    warn!(from = %from, error = %e, "ignoring invalid packet on discovery port");
                }
            }
        }
    }
}

/// Bind the discovery port, wait for one offer, and stop listening.
pub async fn discover(port: u16) -> Result<Offer> {
    let listener = OfferListener::bind(port)?;
    info!(port = port, "waiting for a server offer");
    listener.next_offer().await
}

/// Best-effort outbound IPv4 address of this host.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
