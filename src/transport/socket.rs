//! Packet framing over a TCP byte stream.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::error::TransportError;
use crate::core::{CodecError, HEADER_SIZE, MAX_PAYLOAD};
use crate::protocol::{Packet, PacketHeader};

/// Reads whole packets from a byte stream.
#[derive(Debug)]
pub struct PacketReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Wrap a stream.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next packet.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly between
    /// packets. EOF inside a packet is an `UnexpectedEof` I/O error.
    ///
    /// A packet whose declared payload exceeds [`MAX_PAYLOAD`] is consumed and
    /// reported as [`TransportError::Discarded`]; the stream stays usable.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        let mut raw = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = self.inner.read(&mut raw[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            filled += n;
        }

        let header = PacketHeader::from_bytes(&raw)?;
        let len = header.wire_payload_len();
        if len > MAX_PAYLOAD {
            self.discard(len as u64).await?;
            return Err(TransportError::Discarded {
                seq_num: header.seq_num,
                source: CodecError::PayloadTooLarge(header.length),
            });
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(Packet { header, payload }))
    }

    async fn discard(&mut self, len: u64) -> Result<(), TransportError> {
        let skipped = tokio::io::copy(&mut (&mut self.inner).take(len), &mut tokio::io::sink()).await?;
        if skipped < len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }
}

/// Writes whole packets to a byte stream.
#[derive(Debug)]
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    /// Wrap a stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and write `packet`, returning the number of bytes sent.
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<usize, TransportError> {
        let bytes = packet.encode();
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(bytes.len())
    }
}

/// Open a TCP connection to `addr`, giving up after `timeout`.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout)??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Split a stream into a packet reader and writer.
pub fn split(stream: TcpStream) -> (PacketReader<OwnedReadHalf>, PacketWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (PacketReader::new(read), PacketWriter::new(write))
}
