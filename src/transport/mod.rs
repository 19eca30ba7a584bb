//! Transport: accepts one client session, decodes client frames onto the
//! pipeline's inbound channels, and encodes pipeline output back onto
//! the wire.
//!
//! The reader and writer halves run as independent concurrent tasks
//! joined by channels, so a slow or silent client never blocks frames
//! already queued for the other direction.

pub mod codec;
pub mod session;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::pipeline::messages::{AudioInFrame, AudioOutFrame, ErrorFrame, SeqId, SystemFrame, SystemKind};
use codec::{read_frame, write_frame, FrameKind};
use session::{server_handshake, ControlMessage, NegotiatedRates, SystemMessage};

/// Inbound events the Transport hands to the rest of the pipeline.
#[derive(Debug, Clone)]
pub enum TransportInbound {
    Audio(AudioInFrame),
    Interrupt,
    Drain,
}

/// A split, negotiated client connection ready to exchange frames.
pub struct ClientSession<R, W> {
    reader: ReadHalf<R>,
    writer: SessionWriter<W>,
    pub rates: NegotiatedRates,
}

/// A cloneable handle onto the write half, shareable across the writer
/// task, the error-reporting path, and system-message sends without
/// requiring ownership of the reader half.
pub struct SessionWriter<W> {
    writer: Arc<Mutex<WriteHalf<W>>>,
}

impl<W> Clone for SessionWriter<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W> SessionWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Run the writer loop: encode `AudioOutFrame`s as they arrive.
    pub async fn run_audio_writer(&self, mut audio_rx: mpsc::Receiver<AudioOutFrame>) -> Result<()> {
        while let Some(frame) = audio_rx.recv().await {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, FrameKind::AudioOut, &frame.pcm_bytes).await?;
        }
        Ok(())
    }

    /// Send one `ErrorFrame` to the client.
    pub async fn send_error(&self, error: &ErrorFrame) -> Result<()> {
        let payload = serde_json::to_vec(error).unwrap_or_default();
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, FrameKind::Error, &payload).await
    }

    /// Send a lifecycle `SystemFrame` to the client.
    pub async fn send_system(&self, frame: &SystemFrame) -> Result<()> {
        let message = match frame.kind {
            SystemKind::Drain => SystemMessage::Drain,
            SystemKind::Start => SystemMessage::Start,
            SystemKind::Stop => SystemMessage::Stop,
            SystemKind::Hello | SystemKind::Accept => {
                return Err(EngineError::Protocol(
                    "hello/accept are handshake-only and sent by server_handshake".into(),
                ));
            }
        };
        let payload = serde_json::to_vec(&message)
            .map_err(|e| EngineError::Protocol(format!("failed to encode system frame: {e}")))?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, FrameKind::System, &payload).await
    }
}

/// Negotiate the handshake on a whole stream, then split it into owned
/// read/write halves for [`ClientSession::from_halves`].
pub async fn accept<S>(mut stream: S, sr_in: u32, sr_out: u32) -> Result<(ReadHalf<S>, WriteHalf<S>, NegotiatedRates)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let rates = server_handshake(&mut stream, sr_in, sr_out).await?;
    info!(sr_in = rates.sr_in, sr_out = rates.sr_out, "client session accepted");
    let (reader, writer) = tokio::io::split(stream);
    Ok((reader, writer, rates))
}

impl<R, W> ClientSession<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap already-split, already-negotiated halves.
    #[must_use]
    pub fn from_halves(reader: ReadHalf<R>, writer: WriteHalf<W>, rates: NegotiatedRates) -> Self {
        Self {
            reader,
            writer: SessionWriter {
                writer: Arc::new(Mutex::new(writer)),
            },
            rates,
        }
    }

    /// A cloned handle to the write half, so the caller can send
    /// `AudioOutFrame`s, errors, and system messages concurrently with
    /// `run_reader` consuming `self`.
    #[must_use]
    pub fn writer_handle(&self) -> SessionWriter<W> {
        self.writer.clone()
    }

    /// Run the reader loop: decode frames from the client and forward them
    /// as `TransportInbound` events until EOF or a protocol error.
    pub async fn run_reader(mut self, inbound_tx: mpsc::Sender<TransportInbound>) -> Result<()> {
        let mut seq: SeqId = 0;
        loop {
            let frame = match read_frame(&mut self.reader).await {
                Ok(Some(f)) => f,
                Ok(None) => {
                    info!("client closed connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let (kind, payload) = frame;
            match kind {
                FrameKind::AudioIn => {
                    seq += 1;
                    let event = TransportInbound::Audio(AudioInFrame {
                        seq,
                        turn: 0,
                        pcm_bytes: payload,
                        sample_rate: self.rates.sr_in,
                        channels: 1,
                        timestamp: std::time::Instant::now(),
                    });
                    if inbound_tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                FrameKind::System => {
                    let message: SystemMessage = serde_json::from_slice(&payload).map_err(|e| {
                        EngineError::Protocol(format!("malformed system message: {e}"))
                    })?;
                    match message {
                        SystemMessage::Drain => {
                            if inbound_tx.send(TransportInbound::Drain).await.is_err() {
                                return Ok(());
                            }
                        }
                        SystemMessage::Stop => return Ok(()),
                        _ => {}
                    }
                }
                FrameKind::Control => {
                    let message: ControlMessage = serde_json::from_slice(&payload).map_err(|e| {
                        EngineError::Protocol(format!("malformed control message: {e}"))
                    })?;
                    match message {
                        ControlMessage::Interrupt => {
                            if inbound_tx.send(TransportInbound::Interrupt).await.is_err() {
                                return Ok(());
                            }
                        }
                        ControlMessage::Transcript { .. } => {
                            warn!("ignoring client-sent transcript control message");
                        }
                    }
                }
                FrameKind::Error | FrameKind::AudioOut => {
                    warn!("ignoring server-direction frame kind from client");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::NegotiatedRates;
    use tokio::io::duplex;

    #[tokio::test]
    async fn audio_in_frames_are_forwarded_with_negotiated_sample_rate() {
        let (client_half, server_half) = duplex(4096);
        let (server_reader, server_writer) = tokio::io::split(server_half);
        let rates = NegotiatedRates {
            sr_in: 16_000,
            sr_out: 24_000,
        };
        let session = ClientSession::from_halves(server_reader, server_writer, rates);

        let (inbound_tx, mut inbound_rx) = mpsc::channel(4);
        let reader_handle = tokio::spawn(session.run_reader(inbound_tx));

        let (mut client_reader, mut client_writer) = tokio::io::split(client_half);
        write_frame(&mut client_writer, FrameKind::AudioIn, &[1, 2, 3, 4])
            .await
            .unwrap();
        drop(client_writer);
        let _ = &mut client_reader;

        let event = inbound_rx.recv().await.unwrap();
        match event {
            TransportInbound::Audio(frame) => {
                assert_eq!(frame.pcm_bytes, vec![1, 2, 3, 4]);
                assert_eq!(frame.sample_rate, 16_000);
            }
            other => panic!("expected Audio event, got {other:?}"),
        }

        reader_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn interrupt_control_message_is_forwarded() {
        let (client_half, server_half) = duplex(4096);
        let (server_reader, server_writer) = tokio::io::split(server_half);
        let rates = NegotiatedRates {
            sr_in: 16_000,
            sr_out: 24_000,
        };
        let session = ClientSession::from_halves(server_reader, server_writer, rates);

        let (inbound_tx, mut inbound_rx) = mpsc::channel(4);
        let reader_handle = tokio::spawn(session.run_reader(inbound_tx));

        let (_client_reader, mut client_writer) = tokio::io::split(client_half);
        let payload = serde_json::to_vec(&ControlMessage::Interrupt).unwrap();
        write_frame(&mut client_writer, FrameKind::Control, &payload)
            .await
            .unwrap();
        drop(client_writer);

        let event = inbound_rx.recv().await.unwrap();
        assert!(matches!(event, TransportInbound::Interrupt));
        reader_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drain_system_message_is_forwarded() {
        let (client_half, server_half) = duplex(4096);
        let (server_reader, server_writer) = tokio::io::split(server_half);
        let rates = NegotiatedRates {
            sr_in: 16_000,
            sr_out: 24_000,
        };
        let session = ClientSession::from_halves(server_reader, server_writer, rates);

        let (inbound_tx, mut inbound_rx) = mpsc::channel(4);
        let reader_handle = tokio::spawn(session.run_reader(inbound_tx));

        let (_client_reader, mut client_writer) = tokio::io::split(client_half);
        let payload = serde_json::to_vec(&SystemMessage::Drain).unwrap();
        write_frame(&mut client_writer, FrameKind::System, &payload)
            .await
            .unwrap();
        drop(client_writer);

        let event = inbound_rx.recv().await.unwrap();
        assert!(matches!(event, TransportInbound::Drain));
        reader_handle.await.unwrap().unwrap();
    }
}
