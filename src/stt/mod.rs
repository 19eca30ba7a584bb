//! Speech-to-text stage.
//!
//! Wraps an [`SttEngine`] implementation: consumes a completed
//! `UserSpeechFrame` (one full utterance, already VAD-bounded) and emits a
//! single final `TranscriptFrame`. Cancellable via the interrupt
//! side-channel, though in practice a new `UserSpeech` segment only
//! starts after the prior one finished, so STT cancellation mid-flight is
//! rare — it can happen if the user starts speaking again before the
//! Turn Controller has moved out of `Transcribing`.

use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::pipeline::messages::{InterruptFrame, TranscriptFrame, UserSpeechFrame};
use crate::providers::SttEngine;

/// STT timeout: an utterance that doesn't transcribe within this window
/// is treated as an `EngineError::Timeout`, recoverable by ending the turn.
pub const STT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Transcribe one utterance, or `None` if cancelled by a matching interrupt.
pub async fn run_stt_turn(
    engine: &dyn SttEngine,
    utterance: &UserSpeechFrame,
    mut interrupt_rx: broadcast::Receiver<InterruptFrame>,
) -> Result<Option<TranscriptFrame>> {
    let turn = utterance.turn;

    tokio::select! {
        biased;
        interrupt = interrupt_rx.recv() => {
            if let Ok(frame) = interrupt {
                if frame.turn == turn {
                    info!(turn, "STT cancelled by interrupt before completion");
                    return Ok(None);
                }
            }
            run_stt_turn_inner(engine, utterance).await.map(Some)
        }
        result = run_stt_turn_inner(engine, utterance) => {
            result.map(Some)
        }
    }
}

async fn run_stt_turn_inner(
    engine: &dyn SttEngine,
    utterance: &UserSpeechFrame,
) -> Result<TranscriptFrame> {
    let text = match timeout(
        STT_TIMEOUT,
        engine.transcribe(&utterance.pcm_bytes, utterance.sample_rate),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(EngineError::Timeout(format!(
                "STT did not complete within {STT_TIMEOUT:?}"
            )));
        }
    };
    Ok(TranscriptFrame {
        seq: utterance.seq,
        turn: utterance.turn,
        text,
        is_final: true,
    })
}
