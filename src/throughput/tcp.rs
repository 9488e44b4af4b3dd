//! TCP transfer session.
//!
//! Connects to the reflector, asks for `file_size` bytes with a decimal size
//! line, and reads until exactly that many bytes have arrived.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{bits_per_second, SessionClock, SessionError, SessionReport, Transport};

/// Run one TCP session against `server`.
///
/// The clock starts once the size line is written and stops when the last
/// requested byte is read.  A peer close before that point is an error.
pub async fn run_tcp_session(
    id: u32,
    server: SocketAddr,
    file_size: u64,
    read_chunk: usize,
) -> Result<SessionReport, SessionError> {
    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|source| SessionError::Connect {
            addr: server,
            source,
        })?;
    debug!(session_id = id, server = %server, file_size, "TCP session connected");

    stream
        .write_all(format!("{}\n", file_size).as_bytes())
        .await?;
    let clock = SessionClock::start();

    let mut buf = vec![0u8; read_chunk.max(1)];
    let mut received: u64 = 0;
    while received < file_size {
        // Never read past the requested size.
        let want = (file_size - received).min(buf.len() as u64) as usize;
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(SessionError::PrematureClose {
                received,
                expected: file_size,
            });
        }
        received += n as u64;
    }

    let (finished_at, elapsed) = clock.stop();
    info!(
        session_id = id,
        bytes = received,
        elapsed_ms = elapsed.as_millis() as u64,
        "TCP session finished"
    );

    Ok(SessionReport {
        id,
        transport: Transport::Tcp,
        file_size,
        bytes_received: received,
        started_at: clock.started_at(),
        finished_at,
        elapsed_secs: elapsed.as_secs_f64(),
        bits_per_second: bits_per_second(file_size, elapsed),
        success_rate: None,
    })
}
