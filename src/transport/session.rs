//! Connection lifecycle: handshake and system/control message shapes
//! carried on the `System` (0xFF) and `Control` (0x10) wire kinds.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};

use super::codec::{read_frame, write_frame, FrameKind};
use crate::error::{EngineError, Result};

/// How long the server waits for the client's `accept` before giving up.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// System-plane JSON messages (hello/accept/drain/...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemMessage {
    Hello {
        sr_in: u32,
        sr_out: u32,
        codec: String,
    },
    Accept {
        sr_in: u32,
        sr_out: u32,
    },
    Drain,
    Start,
    Stop,
}

/// Control-plane JSON messages, e.g. live transcript captions and
/// client-initiated barge-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    Transcript { text: String, is_final: bool },
    /// The client wants to interrupt whatever the assistant is currently
    /// saying, independent of VAD-detected speech (e.g. a UI "stop"
    /// button rather than the user actually talking over it).
    Interrupt,
}

/// Negotiated sample rates after a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedRates {
    pub sr_in: u32,
    pub sr_out: u32,
}

/// Server side of the handshake: send `hello`, then wait up to
/// [`HANDSHAKE_TIMEOUT`] for the client's `accept`.
pub async fn server_handshake<S>(stream: &mut S, sr_in: u32, sr_out: u32) -> Result<NegotiatedRates>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = SystemMessage::Hello {
        sr_in,
        sr_out,
        codec: "pcm16".to_string(),
    };
    let payload = serde_json::to_vec(&hello)
        .map_err(|e| EngineError::Protocol(format!("failed to encode hello: {e}")))?;
    write_frame(stream, FrameKind::System, &payload).await?;

    let read_result = timeout(HANDSHAKE_TIMEOUT, read_frame(stream))
        .await
        .map_err(|_| EngineError::Timeout("client did not accept handshake within 5s".into()))?;

    let (kind, payload) = read_result?
        .ok_or_else(|| EngineError::Protocol("connection closed during handshake".into()))?;
    if kind != FrameKind::System {
        return Err(EngineError::Protocol(format!(
            "expected a System frame for handshake accept, got {kind:?}"
        )));
    }

    let message: SystemMessage = serde_json::from_slice(&payload)
        .map_err(|e| EngineError::Protocol(format!("malformed accept message: {e}")))?;
    match message {
        SystemMessage::Accept {
            sr_in: accepted_in,
            sr_out: accepted_out,
        } => Ok(NegotiatedRates {
            sr_in: accepted_in,
            sr_out: accepted_out,
        }),
        other => Err(EngineError::Protocol(format!(
            "expected accept, got {other:?}"
        ))),
    }
}
