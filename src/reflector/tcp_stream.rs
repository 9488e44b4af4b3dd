//! TCP transfer responder.
//!
//! Reads one decimal size line and answers with exactly that many filler
//! bytes, then closes the write side.

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use super::ReflectorError;

/// Longest accepted size line, excluding the newline. `u64::MAX` has 20 digits.
pub const MAX_SIZE_LINE: usize = 32;

const FILLER: u8 = b'A';

/// Serve one accepted connection.  Returns the number of bytes sent.
pub async fn serve_connection(stream: TcpStream, write_chunk: usize) -> Result<u64, ReflectorError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_SIZE_LINE));

    let line = match lines.next().await {
        Some(Ok(line)) => line,
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
            return Err(ReflectorError::SizeLineTooLong { max: MAX_SIZE_LINE })
        }
        Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
        None => return Err(ReflectorError::MissingSizeLine),
    };
    let file_size = parse_size_line(&line)?;

    write_filler(&mut write_half, file_size, write_chunk).await?;
    write_half.shutdown().await?;
    Ok(file_size)
}

/// Parse the ASCII decimal request size.  Surrounding whitespace is ignored;
/// signs and other characters are not.
pub fn parse_size_line(line: &str) -> Result<u64, ReflectorError> {
    let digits = line.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ReflectorError::MalformedSize {
            line: line.to_string(),
        });
    }
    digits.parse().map_err(|_| ReflectorError::MalformedSize {
        line: line.to_string(),
    })
}

/// Write exactly `total` filler bytes in `chunk`-sized pieces.
pub async fn write_filler<W>(writer: &mut W, total: u64, chunk: usize) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let block = vec![FILLER; chunk.max(1)];
    let mut remaining = total;
    while remaining > 0 {
        let n = remaining.min(block.len() as u64) as usize;
        writer.write_all(&block[..n]).await?;
        remaining -= n as u64;
    }
    writer.flush().await
}
