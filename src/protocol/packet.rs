//! Stream framing for the TCP transport
//!
//! Frames have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence ID
//!
//! Maximum payload per frame is 2^24 - 1 bytes; larger payloads are split
//! into continuation frames. The sequence ID is free-running per direction
//! and verified on receive.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transport::TransportError;

/// Maximum payload size for a single frame (2^24 - 1)
pub const MAX_FRAME_SIZE: usize = 16_777_215;

/// Maximum total payload size for multi-frame messages (256 MB); bounds
/// memory consumption from a misbehaving peer.
pub const MAX_TOTAL_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Reads frames from an async stream.
pub struct PacketReader<R> {
    reader: R,
    sequence_id: u8,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        PacketReader {
            reader,
            sequence_id: 0,
        }
    }

    /// Read a complete payload, reassembling continuation frames.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut payload = Vec::new();

        loop {
            let mut header = [0u8; 4];
            match self.reader.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(TransportError::ConnectionClosed);
                }
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
            let seq = header[3];

            if seq != self.sequence_id {
                return Err(TransportError::Protocol(format!(
                    "sequence mismatch: expected {}, got {}",
                    self.sequence_id, seq
                )));
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            if length > 0 {
                let new_size = payload.len().saturating_add(length);
                if new_size > MAX_TOTAL_PAYLOAD_SIZE {
                    return Err(TransportError::Protocol(format!(
                        "payload exceeds maximum size of {} bytes",
                        MAX_TOTAL_PAYLOAD_SIZE
                    )));
                }
                let start = payload.len();
                payload.resize(start + length, 0);
                self.reader.read_exact(&mut payload[start..]).await?;
            }

            // a frame shorter than the maximum ends the message
            if length < MAX_FRAME_SIZE {
                break;
            }
        }

        Ok(payload)
    }
}

/// Writes frames to an async stream.
pub struct PacketWriter<W> {
    writer: W,
    sequence_id: u8,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W) -> Self {
        PacketWriter {
            writer,
            sequence_id: 0,
        }
    }

    /// Write a complete payload, splitting into continuation frames as
    /// needed.
    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut offset = 0;

        loop {
            let remaining = payload.len() - offset;
            let chunk_size = remaining.min(MAX_FRAME_SIZE);

            let length_bytes = (chunk_size as u32).to_le_bytes();
            let header = [
                length_bytes[0],
                length_bytes[1],
                length_bytes[2],
                self.sequence_id,
            ];

            self.writer.write_all(&header).await?;
            self.sequence_id = self.sequence_id.wrapping_add(1);

            if chunk_size > 0 {
                self.writer
                    .write_all(&payload[offset..offset + chunk_size])
                    .await?;
            }

            offset += chunk_size;

            // a maximal frame requires a follow-up (possibly empty) frame
            if chunk_size < MAX_FRAME_SIZE {
                break;
            }
        }

        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut writer = PacketWriter::new(client);
        let mut reader = PacketReader::new(server);

        writer.write_packet(b"hello frames").await.unwrap();
        writer.write_packet(b"").await.unwrap();
        writer.write_packet(&[7u8; 1000]).await.unwrap();

        assert_eq!(reader.read_packet().await.unwrap(), b"hello frames");
        assert_eq!(reader.read_packet().await.unwrap(), Vec::<u8>::new());
        assert_eq!(reader.read_packet().await.unwrap(), vec![7u8; 1000]);
    }

    #[tokio::test]
    async fn test_sequence_mismatch_detected() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let mut writer = PacketWriter::new(client);
        // skip a sequence number on purpose
        writer.sequence_id = 5;
        writer.write_packet(b"x").await.unwrap();

        let mut reader = PacketReader::new(server);
        assert!(matches!(
            reader.read_packet().await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = PacketReader::new(server);
        assert!(matches!(
            reader.read_packet().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
