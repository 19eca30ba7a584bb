//! Text-to-speech stage.
//!
//! The TTS Parent owns a [`TtsChild`] subprocess and turns incoming
//! `UtteranceFrame`s into `AudioOutFrame`s, tracking how many characters
//! of the assistant's reply have actually been sent out as
//! `TtsStoppedFrame.chars_spoken` so the Turn Controller can truncate on
//! barge-in.

pub mod protocol;
pub mod subprocess;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration, Instant};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::pipeline::messages::{
    AudioOutFrame, InterruptFrame, SeqId, TtsStartedFrame, TtsStoppedFrame, TurnId,
    UtteranceFrame,
};
use protocol::{SynthesizeRequest, SynthesizeResponse};
use subprocess::TtsChild;

/// Deadline for the first audio chunk (or `stopped`/`eof`) of a single
/// utterance to arrive after its request is sent.
pub const TTS_FIRST_AUDIO_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for a single utterance to finish synthesizing entirely.
pub const TTS_TOTAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Speak one turn's utterances as they arrive, stopping early if a matching
/// `InterruptFrame` is observed. Returns the number of characters actually
/// sent to the child before stopping.
pub async fn run_tts_turn(
    child: &mut TtsChild,
    turn: TurnId,
    sample_rate: u32,
    mut utterance_rx: mpsc::Receiver<UtteranceFrame>,
    audio_tx: &mpsc::Sender<AudioOutFrame>,
    started_tx: &mpsc::Sender<TtsStartedFrame>,
    mut interrupt_rx: broadcast::Receiver<InterruptFrame>,
) -> Result<TtsStoppedFrame> {
    child.ensure_started().await?;

    let mut chars_spoken: usize = 0;
    let mut seq: SeqId = 0;
    let mut started = false;

    loop {
        tokio::select! {
            biased;
            interrupt = interrupt_rx.recv() => {
                if let Ok(frame) = interrupt {
                    if frame.turn == turn {
                        info!(turn, chars_spoken, "TTS stopped by interrupt");
                        return Ok(TtsStoppedFrame { seq, turn, chars_spoken });
                    }
                }
            }
            maybe_utterance = utterance_rx.recv() => {
                match maybe_utterance {
                    Some(utterance) => {
                        if !started {
                            started = true;
                            let _ = started_tx.send(TtsStartedFrame { seq: 0, turn }).await;
                        }
                        chars_spoken += speak_one_utterance(
                            child,
                            turn,
                            sample_rate,
                            &utterance,
                            &mut seq,
                            audio_tx,
                        )
                        .await?;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(TtsStoppedFrame { seq, turn, chars_spoken })
}

/// Send one utterance's text to the child and stream its audio chunks
/// downstream until `stopped`/`eof`. Returns the utterance's character
/// count. Enforces `TTS_FIRST_AUDIO_TIMEOUT` before the first response and
/// `TTS_TOTAL_TIMEOUT` for the utterance as a whole.
async fn speak_one_utterance(
    child: &mut TtsChild,
    turn: TurnId,
    sample_rate: u32,
    utterance: &UtteranceFrame,
    seq: &mut SeqId,
    audio_tx: &mpsc::Sender<AudioOutFrame>,
) -> Result<usize> {
    child
        .send_request(&SynthesizeRequest {
            text: utterance.text.clone(),
            voice_id: None,
            language: None,
            speed: None,
        })
        .await?;

    let total_deadline = Instant::now() + TTS_TOTAL_TIMEOUT;
    let mut first_response = true;

    loop {
        let per_step_timeout = if first_response {
            std::cmp::min(TTS_FIRST_AUDIO_TIMEOUT, total_deadline.saturating_duration_since(Instant::now()))
        } else {
            total_deadline.saturating_duration_since(Instant::now())
        };

        let response = match timeout(per_step_timeout, child.recv_response()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::Timeout(format!(
                    "TTS synthesis for turn {turn} did not respond within its deadline"
                )));
            }
        };
        first_response = false;

        match response {
            Some(SynthesizeResponse::Started) => continue,
            Some(response @ SynthesizeResponse::AudioChunk { .. }) => {
                let pcm_bytes = response.decode_audio_chunk()?;
                *seq += 1;
                if audio_tx
                    .send(AudioOutFrame {
                        seq: *seq,
                        turn,
                        pcm_bytes,
                        sample_rate,
                        channels: 1,
                    })
                    .await
                    .is_err()
                {
                    return Err(EngineError::Channel(
                        "transport dropped its audio-out receiver".into(),
                    ));
                }
            }
            Some(SynthesizeResponse::Stopped | SynthesizeResponse::Eof) => break,
            Some(SynthesizeResponse::Error { message }) => {
                return Err(EngineError::Tts(message));
            }
            None => {
                return Err(EngineError::ChildExit(
                    "TTS child closed mid-utterance".into(),
                ));
            }
        }
    }

    Ok(utterance.text.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::messages::InterruptReason;

    /// Writes a real executable script to a temp file and spawns it
    /// directly (no `/bin/sh -c` wrapper), the same way `TTS_COMMAND`
    /// names a standalone binary in production. It plays back one fixed
    /// started/audio_chunk/stopped sequence regardless of its stdin, to
    /// exercise `run_tts_turn`'s framing and barge-in logic against an
    /// actual subprocess boundary rather than an in-process fake.
    #[cfg(unix)]
    fn echo_child() -> (TtsChild, tempfile::TempPath) {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let mut script = tempfile::NamedTempFile::new().expect("create temp script");
        writeln!(
            script,
            "#!/bin/sh\nread line; printf '{{\"kind\":\"started\"}}\\n{{\"kind\":\"audio_chunk\",\"data\":\"AQID\"}}\\n{{\"kind\":\"stopped\"}}\\n'"
        )
        .expect("write temp script");
        let mut perms = script.as_file().metadata().unwrap().permissions();
        perms.set_mode(0o755);
        script.as_file().set_permissions(perms).unwrap();

        let path = script.into_temp_path();
        let child = TtsChild::new(vec![path.to_string_lossy().into_owned()], 3);
        (child, path)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tts_turn_streams_audio_and_reports_chars_spoken() {
        let (mut child, _script_path) = echo_child();
        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (audio_tx, mut audio_rx) = mpsc::channel(4);
        let (started_tx, mut started_rx) = mpsc::channel(4);
        let (_interrupt_tx, interrupt_rx) = broadcast::channel(4);

        utterance_tx
            .send(UtteranceFrame {
                seq: 1,
                turn: 1,
                text: "Four.".into(),
            })
            .await
            .unwrap();
        drop(utterance_tx);

        let stopped = run_tts_turn(
            &mut child,
            1,
            24_000,
            utterance_rx,
            &audio_tx,
            &started_tx,
            interrupt_rx,
        )
        .await
        .unwrap();

        assert_eq!(stopped.chars_spoken, "Four.".chars().count());
        assert!(started_rx.recv().await.is_some());
        let audio = audio_rx.recv().await.unwrap();
        assert_eq!(audio.pcm_bytes, vec![1, 2, 3]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tts_turn_stops_early_on_matching_interrupt() {
        // A child that never answers, so the only way out is the interrupt.
        let mut child = TtsChild::new(
            vec!["/bin/sh".into(), "-c".into(), "sleep 5".into()],
            3,
        );
        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (audio_tx, _audio_rx) = mpsc::channel(4);
        let (started_tx, _started_rx) = mpsc::channel(4);
        let (interrupt_tx, interrupt_rx) = broadcast::channel(4);

        utterance_tx
            .send(UtteranceFrame {
                seq: 1,
                turn: 2,
                text: "Hello there.".into(),
            })
            .await
            .unwrap();
        interrupt_tx
            .send(InterruptFrame {
                turn: 2,
                reason: InterruptReason::UserSpeech,
            })
            .unwrap();

        let stopped = run_tts_turn(
            &mut child,
            2,
            24_000,
            utterance_rx,
            &audio_tx,
            &started_tx,
            interrupt_rx,
        )
        .await
        .unwrap();

        assert_eq!(stopped.chars_spoken, 0);
        child.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tts_turn_times_out_waiting_for_first_audio() {
        // Sleeps well past TTS_FIRST_AUDIO_TIMEOUT before ever responding.
        let mut child = TtsChild::new(
            vec!["/bin/sh".into(), "-c".into(), "read line; sleep 5".into()],
            3,
        );
        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (audio_tx, _audio_rx) = mpsc::channel(4);
        let (started_tx, _started_rx) = mpsc::channel(4);
        let (_interrupt_tx, interrupt_rx) = broadcast::channel(4);

        utterance_tx
            .send(UtteranceFrame {
                seq: 1,
                turn: 4,
                text: "Hello there.".into(),
            })
            .await
            .unwrap();
        drop(utterance_tx);

        let err = run_tts_turn(
            &mut child,
            4,
            24_000,
            utterance_rx,
            &audio_tx,
            &started_tx,
            interrupt_rx,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "timeout");
        child.shutdown().await;
    }
}
