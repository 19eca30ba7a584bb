//! TTS child process lifecycle.
//!
//! The child is started lazily on first use and reused across turns. If it
//! exits unexpectedly it is respawned up to `max_restarts` times within a
//! rolling 30s window; beyond that the engine surfaces an unrecoverable
//! `ChildExit` error. Teardown sends `SIGTERM` and escalates to `SIGKILL`
//! after a 2s grace period.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::protocol::{SynthesizeRequest, SynthesizeResponse};
use crate::error::{EngineError, Result};

/// Rolling window used to decide whether a crash counts against `max_restarts`.
const RESTART_WINDOW: Duration = Duration::from_secs(30);
/// Grace period between SIGTERM and SIGKILL on teardown.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);
/// Max bytes accepted for a single response line before it's a protocol error.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// A managed TTS child process plus its line-delimited JSON pipes.
pub struct TtsChild {
    command: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    restart_history: VecDeque<Instant>,
    max_restarts: u32,
}

impl TtsChild {
    #[must_use]
    pub fn new(command: Vec<String>, max_restarts: u32) -> Self {
        Self {
            command,
            child: None,
            stdin: None,
            stdout: None,
            restart_history: VecDeque::new(),
            max_restarts,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Ensure a child is running, spawning (or respawning) it if needed.
    pub async fn ensure_started(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        self.record_restart_and_check_budget()?;
        self.spawn().await
    }

    fn record_restart_and_check_budget(&mut self) -> Result<()> {
        let now = Instant::now();
        while let Some(&front) = self.restart_history.front() {
            if now.duration_since(front) > RESTART_WINDOW {
                self.restart_history.pop_front();
            } else {
                break;
            }
        }
        if self.restart_history.len() as u32 >= self.max_restarts {
            return Err(EngineError::ChildExit(format!(
                "TTS child exceeded {} restarts within {:?}",
                self.max_restarts, RESTART_WINDOW
            )));
        }
        self.restart_history.push_back(now);
        Ok(())
    }

    async fn spawn(&mut self) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| EngineError::Config("TTS command is empty".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Io(std::io::Error::other("TTS child has no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Io(std::io::Error::other("TTS child has no stdout")))?;

        info!(command = ?self.command, "spawned TTS child process");
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        Ok(())
    }

    /// Send one synthesis request as a JSON line.
    pub async fn send_request(&mut self, request: &SynthesizeRequest) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::ChildExit("TTS child not running".into()))?;
        let mut line = serde_json::to_string(request)
            .map_err(|e| EngineError::Protocol(format!("failed to encode TTS request: {e}")))?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            self.mark_exited();
            EngineError::ChildExit(format!("write to TTS child failed: {e}"))
        })?;
        Ok(())
    }

    /// Read the next response line, or `None` on clean EOF.
    pub async fn recv_response(&mut self) -> Result<Option<SynthesizeResponse>> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| EngineError::ChildExit("TTS child not running".into()))?;

        let mut line = String::new();
        let n = stdout.read_line(&mut line).await.map_err(|e| {
            EngineError::ChildExit(format!("read from TTS child failed: {e}"))
        })?;
        if n == 0 {
            self.mark_exited();
            return Ok(None);
        }
        if line.len() > MAX_LINE_BYTES {
            return Err(EngineError::Protocol(format!(
                "TTS response line of {} bytes exceeds {} byte limit",
                line.len(),
                MAX_LINE_BYTES
            )));
        }
        let response: SynthesizeResponse = serde_json::from_str(line.trim_end())
            .map_err(|e| EngineError::Protocol(format!("malformed TTS response: {e}")))?;
        Ok(Some(response))
    }

    /// Optional heartbeat ping, used when the pipeline wants to confirm
    /// liveness between utterances without waiting on a real synthesis
    /// round-trip.
    pub async fn ping(&mut self, deadline: Duration) -> Result<()> {
        self.send_request(&SynthesizeRequest {
            text: String::new(),
            voice_id: None,
            language: None,
            speed: None,
        })
        .await?;
        match timeout(deadline, self.recv_response()).await {
            Ok(Ok(Some(_))) => Ok(()),
            Ok(Ok(None)) => Err(EngineError::ChildExit("TTS child closed during ping".into())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Timeout("TTS ping timed out".into())),
        }
    }

    fn mark_exited(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.child = None;
    }

    /// Graceful shutdown: SIGTERM, wait up to `TERMINATE_GRACE`, then
    /// escalate to SIGKILL.
    pub async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.stdin = None;
        self.stdout = None;

        if let Some(pid) = child.id() {
            // SAFETY: `pid` is a live child PID we own via `child`, and
            // SIGTERM is a standard, non-destructive signal request.
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if result != 0 {
                warn!(pid, "failed to send SIGTERM to TTS child");
            }
        }

        match timeout(TERMINATE_GRACE, child.wait()).await {
            Ok(_) => debug!("TTS child exited after SIGTERM"),
            Err(_) => {
                warn!("TTS child did not exit within grace period; sending SIGKILL");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}
