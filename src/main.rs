//! `duet-server`: the voice pipeline's TCP front door.
//!
//! Accepts one TCP connection per client, negotiates the wire handshake,
//! then feeds inbound audio through a [`PipelineRuntime`] until the
//! client disconnects, a turn aborts unrecoverably, or the process is
//! asked to drain.

use std::sync::Arc;
use std::time::Duration;

use duet::config::EngineConfig;
use duet::metrics::{MetricsSink, VecMetricsSink};
use duet::pipeline::messages::{AudioOutFrame, SystemFrame, SystemKind, TtsStartedFrame};
use duet::pipeline::runtime::PipelineRuntime;
use duet::providers::{FixedLlm, FixedStt, LlmProvider, SttEngine};
use duet::transport::{self, ClientSession, TransportInbound};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Client audio is always negotiated at 16kHz mono PCM16; the output
/// rate is whatever `TTS_SAMPLE_RATE` configures.
const AUDIO_IN_SAMPLE_RATE: u32 = 16_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var("LOG_DIR").ok();
    let _log_guard = init_tracing(log_dir.as_deref());

    let config = EngineConfig::from_env().map_err(|e| {
        error!(error = %e, "invalid configuration");
        anyhow::anyhow!("configuration error: {e}")
    })?;

    let shutdown_token = CancellationToken::new();
    spawn_shutdown_listener(shutdown_token.clone());

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "duet-server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let session_id = Uuid::new_v4().to_string();
        info!(%peer, session_id = %session_id, "client connected");

        let config = config.clone();
        let conn_token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, config, conn_token, session_id.clone()).await {
                error!(%peer, session_id = %session_id, error = %e, "session ended with error");
            }
            info!(%peer, session_id = %session_id, "client disconnected");
        });
    }
}

/// Installs the `tracing` subscriber. With `LOG_DIR` set, logs go to a
/// daily-rotating file via a non-blocking writer; otherwise to stdout.
/// The returned guard must be held for the process lifetime, since
/// dropping it stops the non-blocking writer's background flush thread.
fn init_tracing(log_dir: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "duet-server.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
    }
}

/// Listens for SIGINT/SIGTERM and cancels the shared shutdown token,
/// which every active session is watching to begin a graceful drain.
fn spawn_shutdown_listener(shutdown_token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received ctrl-c");
        }

        info!("draining active sessions");
        shutdown_token.cancel();
    });
}

async fn handle_connection(
    stream: TcpStream,
    config: EngineConfig,
    shutdown_token: CancellationToken,
    session_id: String,
) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);

    let (reader, writer, rates) =
        transport::accept(stream, AUDIO_IN_SAMPLE_RATE, config.tts.sample_rate).await?;
    let session = ClientSession::from_halves(reader, writer, rates);
    let writer_handle = session.writer_handle();

    let idle_ping_ms = config.tts.idle_ping_ms;
    let stt_engine: Arc<dyn SttEngine> = Arc::new(FixedStt::new(String::new()));
    let llm_provider: Arc<dyn LlmProvider> = Arc::new(FixedLlm::new(String::new()));
    let metrics: Arc<dyn MetricsSink> = Arc::new(VecMetricsSink::new());
    let mut runtime = PipelineRuntime::new(config, stt_engine, llm_provider, metrics);

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<TransportInbound>(64);
    let (audio_tx, audio_rx) = mpsc::channel::<AudioOutFrame>(64);
    let (started_tx, mut started_rx) = mpsc::channel::<TtsStartedFrame>(8);
    let (outcome_tx, mut outcome_rx) = mpsc::channel(16);

    let reader_handle = tokio::spawn(session.run_reader(inbound_tx));
    let audio_writer = writer_handle.clone();
    let writer_handle_task = tokio::spawn(async move { audio_writer.run_audio_writer(audio_rx).await });

    let mut idle_ping_interval = tokio::time::interval(Duration::from_millis(u64::from(idle_ping_ms)));
    idle_ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    idle_ping_interval.tick().await; // first tick fires immediately

    let mut draining = false;
    loop {
        tokio::select! {
            event = inbound_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    TransportInbound::Audio(frame) => {
                        let samples: Vec<i16> = frame
                            .pcm_bytes
                            .chunks_exact(2)
                            .map(|c| i16::from_le_bytes([c[0], c[1]]))
                            .collect();
                        runtime.process_audio_chunk(&samples, &audio_tx, &started_tx, &outcome_tx).await;
                    }
                    TransportInbound::Drain => {
                        draining = true;
                        runtime.begin_drain();
                        let _ = writer_handle.send_system(&SystemFrame { kind: SystemKind::Drain }).await;
                        if runtime.current_turn_is_none().await {
                            break;
                        }
                    }
                    TransportInbound::Interrupt => {
                        runtime.interrupt_current().await;
                    }
                }
            }
            outcome = outcome_rx.recv() => {
                let Some(outcome) = outcome else { continue };
                if let Some(error) = outcome.error {
                    warn!(turn = outcome.turn, session_id = %session_id, kind = error.kind, "turn error sent to client");
                    let _ = writer_handle.send_error(&error).await;
                }
                if draining && runtime.current_turn_is_none().await {
                    break;
                }
            }
            // Only polled until the session itself starts draining: once
            // cancelled, this future resolves immediately forever after,
            // which would otherwise starve the other branches.
            () = shutdown_token.cancelled(), if !draining => {
                draining = true;
                runtime.begin_drain();
                let _ = writer_handle.send_system(&SystemFrame { kind: SystemKind::Drain }).await;
                if runtime.current_turn_is_none().await {
                    break;
                }
            }
            started = started_rx.recv() => {
                if started.is_none() {
                    break;
                }
            }
            _ = idle_ping_interval.tick() => {
                runtime.ping_tts_if_idle().await;
            }
        }
    }

    reader_handle.abort();
    writer_handle_task.abort();
    Ok(())
}
