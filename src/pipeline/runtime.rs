//! Pipeline Runtime: wires one session's stages together, drives turns
//! end-to-end, and records per-turn metrics.
//!
//! Lifecycle: one `PipelineRuntime` per client session. Audio chunks are
//! fed in via [`PipelineRuntime::process_audio_chunk`], which keeps
//! feeding the VAD even while a turn is in flight: once a full utterance
//! is segmented, the turn is driven on a spawned task so inbound audio
//! (and therefore barge-in detection) is never blocked on STT/LLM/TTS
//! work. The controller and TTS child are shared with that spawned task
//! via `Arc<Mutex<_>>`, the same pattern `SessionWriter` uses to share
//! the write half across the writer task and the error-reporting path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::context::ContextStore;
use crate::error::{Recoverable, Result};
use crate::metrics::{MetricsSink, TurnMetrics};
use crate::pipeline::controller::TurnController;
use crate::pipeline::messages::{
    AudioOutFrame, ErrorFrame, InterruptReason, LlmTokenFrame, TtsStartedFrame, TurnId,
    UserSpeechFrame,
};
use crate::providers::{LlmProvider, SttEngine};
use crate::tts::subprocess::TtsChild;
use crate::vad::VadGate;
use crate::{llm, stt, tts};

/// Deadline for the idle heartbeat ping itself, independent of the idle
/// interval that decides when to send one.
const TTS_PING_DEADLINE: Duration = Duration::from_secs(2);

/// Result of driving one turn to completion (or abort), reported back to
/// the session loop once the spawned turn task finishes.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn: TurnId,
    pub error: Option<ErrorFrame>,
}

/// One session's worth of stage state. The controller and TTS child are
/// shared with spawned turn tasks; everything else is only ever touched
/// from the session loop that owns this runtime.
pub struct PipelineRuntime {
    config: EngineConfig,
    vad: VadGate,
    stt_engine: Arc<dyn SttEngine>,
    llm_provider: Arc<dyn LlmProvider>,
    tts_child: Arc<Mutex<TtsChild>>,
    controller: Arc<Mutex<TurnController>>,
    metrics: Arc<dyn MetricsSink>,
    draining: bool,
    last_activity: Instant,
}

impl PipelineRuntime {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        stt_engine: Arc<dyn SttEngine>,
        llm_provider: Arc<dyn LlmProvider>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let vad = VadGate::new(&config.vad, 16_000);
        let tts_child = Arc::new(Mutex::new(TtsChild::new(
            config.tts.command.clone(),
            config.tts.max_restarts,
        )));
        let context = ContextStore::new(config.system_prompt.clone(), config.llm.context_max);
        let (interrupt_tx, _) = tokio::sync::broadcast::channel(32);
        let controller = Arc::new(Mutex::new(TurnController::new(context, interrupt_tx)));

        Self {
            config,
            vad,
            stt_engine,
            llm_provider,
            tts_child,
            controller,
            metrics,
            draining: false,
            last_activity: Instant::now(),
        }
    }

    /// `SystemFrame{drain}` arrived: let the current turn finish, then
    /// refuse to start new ones.
    pub fn begin_drain(&mut self) {
        self.draining = true;
    }

    /// Whether no turn is currently in flight, used by the session loop
    /// to decide when a drain or shutdown can complete.
    pub async fn current_turn_is_none(&self) -> bool {
        self.controller.lock().await.current_turn().is_none()
    }

    /// Raise an explicit, client-requested interrupt against whatever
    /// turn is currently in flight. A no-op if no turn is active.
    pub async fn interrupt_current(&self) {
        self.controller
            .lock()
            .await
            .interrupt_current(InterruptReason::ClientRequest);
    }

    /// Send a heartbeat ping to the TTS child if it's running and the
    /// session has been idle (no audio processed, no ping sent) for at
    /// least `TTS_IDLE_PING_MS`. Meant to be called from a periodic timer
    /// in the session loop so a wedged child is caught before the next
    /// real utterance needs it.
    pub async fn ping_tts_if_idle(&mut self) {
        let idle_threshold = Duration::from_millis(u64::from(self.config.tts.idle_ping_ms));
        if self.last_activity.elapsed() < idle_threshold {
            return;
        }

        let mut child = self.tts_child.lock().await;
        if !child.is_running() {
            return;
        }
        match child.ping(TTS_PING_DEADLINE).await {
            Ok(()) => info!("TTS idle heartbeat succeeded"),
            Err(e) => warn!(error = %e, "TTS idle heartbeat failed"),
        }
        drop(child);
        self.last_activity = Instant::now();
    }

    /// Feed one chunk of client-captured PCM16 samples. Once a full
    /// utterance is segmented, spawns a task to drive it through STT →
    /// Turn Controller → LLM → Sentence Aggregator → TTS Parent and
    /// report a [`TurnOutcome`] on `outcome_tx`, without blocking this
    /// call — the VAD keeps seeing every subsequent chunk so a barge-in
    /// during that turn is detected as soon as it happens.
    #[instrument(skip(self, samples, audio_tx, started_tx, outcome_tx))]
    pub async fn process_audio_chunk(
        &mut self,
        samples: &[i16],
        audio_tx: &mpsc::Sender<AudioOutFrame>,
        started_tx: &mpsc::Sender<TtsStartedFrame>,
        outcome_tx: &mpsc::Sender<TurnOutcome>,
    ) {
        self.last_activity = Instant::now();
        let out = self.vad.process_chunk(samples);

        if out.speech_started && !self.draining {
            self.controller.lock().await.on_vad_start(Instant::now());
        }

        let Some(segment) = out.segment else {
            return;
        };
        // Turn boundary: clear pre-roll and buffering state so nothing
        // from this utterance leaks into the next one's segment.
        self.vad.reset();

        let turn_id = {
            let ctl = self.controller.lock().await;
            // `current_turn()` is only `None` here if a segment completed
            // without ever seeing `VadStart` (should not happen) or a new
            // turn was refused while draining — either way there is
            // nothing to drive.
            match ctl.current_turn() {
                Some(turn) => turn.id,
                None => return,
            }
        };

        let utterance = UserSpeechFrame {
            seq: 1,
            turn: turn_id,
            pcm_bytes: samples_to_le_bytes(&segment),
            sample_rate: 16_000,
        };

        let stt_engine = Arc::clone(&self.stt_engine);
        let llm_provider = Arc::clone(&self.llm_provider);
        let controller = Arc::clone(&self.controller);
        let tts_child = Arc::clone(&self.tts_child);
        let metrics_sink = Arc::clone(&self.metrics);
        let sample_rate = self.config.tts.sample_rate;
        let audio_tx = audio_tx.clone();
        let started_tx = started_tx.clone();
        let outcome_tx = outcome_tx.clone();

        tokio::spawn(async move {
            let result = drive_turn(
                stt_engine,
                llm_provider,
                controller,
                tts_child,
                Arc::clone(&metrics_sink),
                sample_rate,
                turn_id,
                utterance,
                audio_tx,
                started_tx,
            )
            .await;

            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    let recoverable = e.default_recoverable() == Recoverable::Yes;
                    error!(turn = turn_id, error = %e, "turn aborted");
                    Some(ErrorFrame {
                        turn: Some(turn_id),
                        kind: e.kind(),
                        message: e.to_string(),
                        recoverable,
                    })
                }
            };

            let _ = outcome_tx
                .send(TurnOutcome {
                    turn: turn_id,
                    error,
                })
                .await;
        });
    }
}

/// Drive one turn end to end. Runs independently of the session loop's
/// audio-feeding path once spawned; the controller and TTS child are
/// locked only for the duration of each individual operation (or, for
/// the TTS child, for the lifetime of the TTS stage, since only one
/// turn's audio may be in flight through it at a time).
#[allow(clippy::too_many_arguments)]
async fn drive_turn(
    stt_engine: Arc<dyn SttEngine>,
    llm_provider: Arc<dyn LlmProvider>,
    controller: Arc<Mutex<TurnController>>,
    tts_child: Arc<Mutex<TtsChild>>,
    metrics_sink: Arc<dyn MetricsSink>,
    sample_rate: u32,
    turn_id: TurnId,
    utterance: UserSpeechFrame,
    audio_tx: mpsc::Sender<AudioOutFrame>,
    started_tx: mpsc::Sender<TtsStartedFrame>,
) -> Result<()> {
    let mut metrics = TurnMetrics::new(turn_id);
    metrics.t_vad_end = Some(Instant::now());

    let stt_interrupts = controller.lock().await.subscribe_interrupts();
    let transcript = stt::run_stt_turn(stt_engine.as_ref(), &utterance, stt_interrupts).await?;

    let Some(transcript) = transcript else {
        metrics.interrupted = true;
        metrics_sink.record_turn(metrics);
        return Ok(());
    };
    metrics.t_stt_done = Some(Instant::now());

    let prompt = {
        let mut ctl = controller.lock().await;
        ctl.on_transcript_final(turn_id, transcript.text)
    };
    let Some(prompt) = prompt else {
        // Turn was retired concurrently (e.g. by a barge-in interrupt
        // racing the transcript); nothing further to do.
        return Ok(());
    };

    let (llm_to_tap_tx, mut llm_to_tap_rx) =
        mpsc::channel::<LlmTokenFrame>(llm::TOKEN_CHANNEL_CAPACITY);
    let (tap_to_agg_tx, tap_to_agg_rx) = mpsc::channel::<LlmTokenFrame>(llm::TOKEN_CHANNEL_CAPACITY);
    let (utterance_tx, utterance_rx) = mpsc::channel(llm::TOKEN_CHANNEL_CAPACITY);

    // LLM, Sentence Aggregator, and TTS Parent run concurrently: TTS
    // speaks the first sentence while the LLM is still generating later
    // ones. A small tap sits between the LLM and the aggregator so the
    // Turn Controller's `assistant_text` stays current as tokens arrive,
    // which is what lets a barge-in commit the correct spoken prefix.
    let llm_interrupts = controller.lock().await.subscribe_interrupts();
    let llm_fut = async move {
        llm::run_llm_turn(llm_provider.as_ref(), &prompt, &llm_to_tap_tx, llm_interrupts).await
    };

    let tap_controller = Arc::clone(&controller);
    let tap_fut = async move {
        while let Some(token) = llm_to_tap_rx.recv().await {
            tap_controller
                .lock()
                .await
                .on_llm_delta(turn_id, &token.delta_text);
            if tap_to_agg_tx.send(token).await.is_err() {
                break;
            }
        }
        Ok::<(), crate::error::EngineError>(())
    };

    let aggregator_fut =
        async move { llm::run_aggregator_turn(tap_to_agg_rx, &utterance_tx, turn_id).await };

    let tts_interrupts = controller.lock().await.subscribe_interrupts();
    let mut tts_guard = tts_child.lock().await;
    let tts_fut = tts::run_tts_turn(
        &mut tts_guard,
        turn_id,
        sample_rate,
        utterance_rx,
        &audio_tx,
        &started_tx,
        tts_interrupts,
    );

    let (completed, (), _done, stopped) = tokio::try_join!(llm_fut, tap_fut, aggregator_fut, tts_fut)?;
    drop(tts_guard);

    if !completed {
        metrics.interrupted = true;
    }
    metrics.t_llm_first_token = Some(Instant::now());
    metrics.t_tts_first_audio = Some(Instant::now());
    metrics.t_tts_done = Some(Instant::now());

    {
        let mut ctl = controller.lock().await;
        ctl.on_tts_progress(turn_id, stopped.chars_spoken);
        if ctl.current_turn().map(|t| t.id) == Some(turn_id) {
            ctl.on_turn_done(turn_id, Instant::now());
        } else {
            metrics.interrupted = true;
        }
    }

    metrics_sink.record_turn(metrics);
    Ok(())
}

fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
