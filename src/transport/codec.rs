//! Binary frame codec for the transport wire protocol.
//!
//! Each message is a 4-byte big-endian length (covering the kind tag plus
//! payload) followed by a 1-byte kind tag and the payload itself.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EngineError, Result};

/// Maximum frame body (kind + payload) accepted from a peer, guarding
/// against a malformed or hostile length prefix.
pub const MAX_FRAME_BYTES: u32 = 8 * 1024 * 1024;

/// Wire frame kinds, identified by a single tag byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// C→S PCM16 audio block.
    AudioIn,
    /// S→C PCM16 audio block.
    AudioOut,
    /// Either direction, JSON control message.
    Control,
    /// S→C JSON error.
    Error,
    /// Either direction, JSON system message (hello/accept/drain/...).
    System,
}

impl FrameKind {
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::AudioIn => 0x01,
            Self::AudioOut => 0x02,
            Self::Control => 0x10,
            Self::Error => 0x20,
            Self::System => 0xFF,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0x01 => Ok(Self::AudioIn),
            0x02 => Ok(Self::AudioOut),
            0x10 => Ok(Self::Control),
            0x20 => Ok(Self::Error),
            0xFF => Ok(Self::System),
            other => Err(EngineError::Protocol(format!("unknown frame kind tag 0x{other:02x}"))),
        }
    }
}

/// Write one length-prefixed frame: `[len:4][kind:1][payload]`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<()> {
    let body_len = payload.len() as u32 + 1;
    writer.write_all(&body_len.to_be_bytes()).await?;
    writer.write_all(&[kind.tag()]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, or `None` on a clean EOF before any
/// bytes of the next frame arrive.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<(FrameKind, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(EngineError::Io(e)),
    }
    let body_len = u32::from_be_bytes(len_buf);
    if body_len == 0 {
        return Err(EngineError::Protocol("zero-length frame body".into()));
    }
    if body_len > MAX_FRAME_BYTES {
        return Err(EngineError::Protocol(format!(
            "frame body of {body_len} bytes exceeds {MAX_FRAME_BYTES} byte limit"
        )));
    }

    let mut kind_buf = [0u8; 1];
    reader.read_exact(&mut kind_buf).await?;
    let kind = FrameKind::from_tag(kind_buf[0])?;

    let payload_len = (body_len - 1) as usize;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    Ok(Some((kind, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_control_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameKind::Control, b"{\"hi\":1}").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let (kind, payload) = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(kind, FrameKind::Control);
        assert_eq!(payload, b"{\"hi\":1}");
    }

    #[tokio::test]
    async fn reading_past_eof_yields_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }

    #[test]
    fn tag_round_trips_through_from_tag() {
        for kind in [
            FrameKind::AudioIn,
            FrameKind::AudioOut,
            FrameKind::Control,
            FrameKind::Error,
            FrameKind::System,
        ] {
            assert_eq!(FrameKind::from_tag(kind.tag()).unwrap(), kind);
        }
    }
}
