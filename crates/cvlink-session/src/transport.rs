//! TCP transport for the two session stream pairs.
//!
//! A session owns two independent connections, opened and closed as a
//! unit:
//!
//! - the **programming pair** toward the command-station LAN gateway
//!   (write/verify frames go out here), and
//! - the **status pair** toward the RS-bus feedback receiver (status
//!   polls go out, feedback replies come back).
//!
//! TCP delivers a byte stream with no framing of its own, so the feedback
//! side accumulates bytes in a [`FrameBuffer`]: a short read stays
//! buffered until the rest of the frame arrives, and a corrupt byte is
//! skipped one position at a time until the decoder re-synchronizes on
//! the next frame header. A malformed frame is never fatal to the
//! session.

use std::net::SocketAddr;

use async_trait::async_trait;
use cvlink_core::protocol::codec::{decode_feedback, DecodeError};
use cvlink_core::FeedbackMessage;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::warn;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening one of the two TCP connections failed. The session stays
    /// closed and the request queue is preserved for a retry.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error on an established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One TCP connection split into its read and write halves.
///
/// Exclusively owned by the session driver for its lifetime; no other
/// component reads or writes the underlying socket.
pub struct StreamPair {
    pub reader: OwnedReadHalf,
    pub writer: OwnedWriteHalf,
}

impl StreamPair {
    /// Connects to `addr` and splits the stream.
    pub async fn open(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }
}

/// Sink for outbound frames.
///
/// The driver is generic over this trait so tests can substitute a
/// recording double for the TCP write half. A returned `Ok(())` is the
/// transport's "send completed" signal.
#[async_trait]
pub trait FrameSink: Send {
    async fn transmit(&mut self, frame: &[u8]) -> std::io::Result<()>;
}

#[async_trait]
impl FrameSink for OwnedWriteHalf {
    async fn transmit(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.write_all(frame).await?;
        self.flush().await
    }
}

/// Accumulation buffer turning the status byte stream into decoded
/// feedback frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete feedback frame, if one is available.
    ///
    /// On a partial frame this returns `None` and keeps the bytes for the
    /// next read. On a checksum failure or unknown header byte it drops a
    /// single byte and tries again, scanning forward until it finds the
    /// next decodable frame boundary.
    pub fn next_frame(&mut self) -> Option<FeedbackMessage> {
        loop {
            match decode_feedback(&self.buf) {
                Ok((msg, consumed)) => {
                    self.buf.drain(..consumed);
                    return Some(msg);
                }
                Err(DecodeError::FrameTooShort { .. }) => return None,
                Err(err) => {
                    warn!(%err, skipped = self.buf[0], "dropping byte to re-synchronize");
                    self.buf.remove(0);
                }
            }
        }
    }

    /// Number of buffered, not-yet-decoded bytes.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cvlink_core::protocol::codec::encode_feedback;
    use cvlink_core::{CvNumber, DecoderAddress};

    fn sample(value: u8) -> FeedbackMessage {
        FeedbackMessage {
            address: DecoderAddress::new(3).unwrap(),
            cv: CvNumber::new(29).unwrap(),
            value,
        }
    }

    #[test]
    fn test_whole_frame_decodes_immediately() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&encode_feedback(&sample(6)));

        assert_eq!(buffer.next_frame(), Some(sample(6)));
        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_split_frame_is_buffered_until_complete() {
        let frame = encode_feedback(&sample(6));
        let mut buffer = FrameBuffer::new();

        buffer.push(&frame[..3]);
        assert_eq!(buffer.next_frame(), None, "short read must wait");
        assert_eq!(buffer.pending(), 3, "partial bytes are retained");

        buffer.push(&frame[3..]);
        assert_eq!(buffer.next_frame(), Some(sample(6)));
    }

    #[test]
    fn test_two_frames_in_one_read_decode_in_order() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_feedback(&sample(1)));
        bytes.extend_from_slice(&encode_feedback(&sample(2)));
        buffer.push(&bytes);

        assert_eq!(buffer.next_frame(), Some(sample(1)));
        assert_eq!(buffer.next_frame(), Some(sample(2)));
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn test_garbage_prefix_is_skipped_to_next_frame() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&[0x00, 0x13, 0x37]);
        buffer.push(&encode_feedback(&sample(6)));

        assert_eq!(buffer.next_frame(), Some(sample(6)));
    }

    #[test]
    fn test_corrupted_frame_is_dropped_and_next_frame_survives() {
        let mut corrupt = encode_feedback(&sample(1));
        corrupt[6] ^= 0xFF; // breaks the checksum

        let mut buffer = FrameBuffer::new();
        buffer.push(&corrupt);
        buffer.push(&encode_feedback(&sample(2)));

        assert_eq!(buffer.next_frame(), Some(sample(2)));
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn test_resync_does_not_loop_forever_on_pure_garbage() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&[0xAA; 64]);

        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.pending(), 0, "undecodable bytes are consumed");
    }
}
