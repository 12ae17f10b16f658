//! Framing for the streaming session transport
//!
//! A single connection carries both logical streams; every message is one
//! frame. Frame layout:
//!
//! ```text
//! magic   u32  big-endian, constant
//! version u8   protocol revision
//! kind    u8   which envelope the payload decodes as
//! length  u32  big-endian payload length
//! payload length bytes of encoded envelope
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BrokerError, Result};

/// Frame magic, "MIPC"
pub const MAGIC: u32 = 0x4D49_5043;

/// Current framing revision
pub const VERSION: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 10;

/// Ceiling on a single frame payload (streaming sends are unchunked by default)
pub const MAX_PAYLOAD: u32 = 8 * 1024 * 1024;

/// What the frame payload decodes as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// `SinkMessage`, agent to server
    Sink = 1,
    /// Registration header (`RpcResponse` with empty rpc id), agent to server
    Header = 2,
    /// `RpcRequest`, server to agent
    RpcRequest = 3,
    /// `RpcResponse`, agent to server
    RpcResponse = 4,
}

impl TryFrom<u8> for FrameKind {
    type Error = BrokerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Sink),
            2 => Ok(Self::Header),
            3 => Ok(Self::RpcRequest),
            4 => Ok(Self::RpcResponse),
            other => Err(BrokerError::BadFrame {
                reason: format!("unknown frame kind {other}"),
            }),
        }
    }
}

/// One framed envelope
#[derive(Debug, Clone)]
pub struct Frame {
    /// Payload interpretation
    pub kind: FrameKind,
    /// Encoded envelope bytes
    pub payload: Bytes,
}

impl Frame {
    /// Wrap an encoded envelope
    pub fn new(kind: FrameKind, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// Encode header and payload into one buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u32(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Read one frame, validating magic, version, and size
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != MAGIC {
        return Err(BrokerError::BadFrame {
            reason: format!("bad magic {magic:#010x}"),
        });
    }
    let version = header[4];
    if version != VERSION {
        return Err(BrokerError::BadFrame {
            reason: format!("unsupported framing version {version}"),
        });
    }
    let kind = FrameKind::try_from(header[5])?;
    let length = u32::from_be_bytes([header[6], header[7], header[8], header[9]]);
    if length > MAX_PAYLOAD {
        return Err(BrokerError::FrameTooLarge {
            size: length,
            max: MAX_PAYLOAD,
        });
    }

    let mut payload = vec![0u8; length as usize];
    if length > 0 {
        reader.read_exact(&mut payload).await?;
    }
    Ok(Frame::new(kind, Bytes::from(payload)))
}

/// Write one frame and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = Frame::new(FrameKind::RpcRequest, Bytes::from_static(b"payload"));
        write_frame(&mut client, &frame).await.unwrap();

        let decoded = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded.kind, FrameKind::RpcRequest);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[tokio::test]
    async fn test_empty_payload_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &Frame::new(FrameKind::Header, Bytes::new()))
            .await
            .unwrap();
        let decoded = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded.kind, FrameKind::Header);
        assert!(decoded.payload.is_empty());
    }

    #[tokio::test]
    async fn test_bad_magic_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut bogus = vec![0u8; HEADER_LEN];
        bogus[0] = 0xde;
        tokio::io::AsyncWriteExt::write_all(&mut client, &bogus)
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(BrokerError::BadFrame { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC.to_be_bytes());
        header.push(VERSION);
        header.push(FrameKind::Sink as u8);
        header.extend_from_slice(&(MAX_PAYLOAD + 1).to_be_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut client, &header)
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(BrokerError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC.to_be_bytes());
        header.push(VERSION);
        header.push(0x7f);
        header.extend_from_slice(&0u32.to_be_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut client, &header)
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(BrokerError::BadFrame { .. })
        ));
    }
}
