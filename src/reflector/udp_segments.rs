//! UDP transfer sender.
//!
//! Answers a Request by sending `ceil(file_size / 512)` Payload packets,
//! numbered from 1, back to the requester as fast as the socket accepts them.
//! There is no pacing, acknowledgment or retransmission.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::wire::{segment_count, Packet, PayloadBody, PAYLOAD_LEN};

/// Send every segment for `file_size` to `peer`.  Returns the segment count.
pub async fn serve_request(
    socket: &UdpSocket,
    peer: SocketAddr,
    file_size: u64,
) -> std::io::Result<u64> {
    let total_segments = segment_count(file_size);
    let mut buf = BytesMut::with_capacity(PAYLOAD_LEN);

    for segment_number in 1..=total_segments {
        buf.clear();
        Packet::Payload(PayloadBody {
            total_segments,
            segment_number,
        })
        .encode_into(&mut buf);
        socket.send_to(&buf, peer).await?;
    }

    trace!(peer = %peer, total_segments, "all segments sent");
    Ok(total_segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sends_numbered_segments() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = client.local_addr().unwrap();

        let sent = serve_request(&server, peer, 5_000).await.unwrap();
        assert_eq!(sent, 10);

        let mut buf = [0u8; 1024];
        for expected in 1..=10u64 {
            let (len, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
                .await
                .expect("segment within timeout")
                .unwrap();
            assert_eq!(len, PAYLOAD_LEN);
            match Packet::decode(&buf[..len]).unwrap() {
                Packet::Payload(body) => {
                    assert_eq!(body.total_segments, 10);
                    assert_eq!(body.segment_number, expected);
                }
                other => panic!("expected payload, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_zero_size_sends_nothing() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let sent = serve_request(&server, client.local_addr().unwrap(), 0).await.unwrap();
        assert_eq!(sent, 0);

        let mut buf = [0u8; 1024];
        let waited =
            tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
        assert!(waited.is_err());
    }
}
