//! Per-turn metrics hooks.
//!
//! This is an observability *contract*, not an exporter: the runtime
//! records timings into a [`TurnMetrics`] and hands it to a pluggable
//! [`MetricsSink`]. Wiring a real exporter (Prometheus, OTel, ...) is
//! out of scope.

use std::time::Instant;

use crate::pipeline::messages::TurnId;

/// Latency and outcome measurements for a single turn.
///
/// `t_*` fields are [`Instant`]s: fine for measuring durations *within*
/// this process, useless for correlating against another system's
/// clock. `started_at` carries the turn's wall-clock start for that
/// purpose (e.g. matching a metrics export against external logs).
#[derive(Debug, Clone)]
pub struct TurnMetrics {
    pub turn: TurnId,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub t_vad_end: Option<Instant>,
    pub t_stt_done: Option<Instant>,
    pub t_llm_first_token: Option<Instant>,
    pub t_tts_first_audio: Option<Instant>,
    pub t_tts_done: Option<Instant>,
    pub interrupted: bool,
}

impl TurnMetrics {
    #[must_use]
    pub fn new(turn: TurnId) -> Self {
        Self {
            turn,
            started_at: chrono::Utc::now(),
            t_vad_end: None,
            t_stt_done: None,
            t_llm_first_token: None,
            t_tts_first_audio: None,
            t_tts_done: None,
            interrupted: false,
        }
    }
}

/// Sink for completed turn metrics. Implementors decide what to do with
/// the measurement (log it, export it, aggregate it for tests).
pub trait MetricsSink: Send + Sync {
    fn record_turn(&self, metrics: TurnMetrics);
}

/// In-memory reference sink, primarily useful for tests and for local
/// debugging via the latency harness.
#[derive(Debug, Default)]
pub struct VecMetricsSink {
    inner: std::sync::Mutex<Vec<TurnMetrics>>,
}

impl VecMetricsSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<TurnMetrics> {
        self.inner.lock().expect("metrics mutex poisoned").clone()
    }
}

impl MetricsSink for VecMetricsSink {
    fn record_turn(&self, metrics: TurnMetrics) {
        self.inner.lock().expect("metrics mutex poisoned").push(metrics);
    }
}

/// A sink that discards every measurement, used when no observer is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn record_turn(&self, _metrics: TurnMetrics) {}
}
