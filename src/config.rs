//! Configuration for the voice pipeline, loaded once from the environment
//! at process start.

use crate::error::{EngineError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Transport listening port.
    pub port: u16,
    /// VAD settings.
    pub vad: VadConfig,
    /// LLM settings.
    pub llm: LlmConfig,
    /// TTS settings.
    pub tts: TtsConfig,
    /// STT settings.
    pub stt: SttConfig,
    /// Fixed system prompt pinned at context position 0.
    pub system_prompt: String,
    /// Directory for daily-rotating log files. `None` logs to stdout only.
    pub log_dir: Option<String>,
}

/// Voice-activity-detection tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Silence hold-off before leaving the SPEECH state, in milliseconds.
    pub min_silence_ms: u32,
    /// Continuous-activity threshold to enter the SPEECH state, in milliseconds.
    pub start_ms: u32,
    /// Pre-roll buffer prepended to the emitted utterance, in milliseconds.
    pub pad_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_silence_ms: 200,
            start_ms: 80,
            pad_ms: 120,
        }
    }
}

/// LLM stage tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens generated per turn.
    pub max_tokens: u32,
    /// Maximum number of non-system messages retained by the Context Store.
    pub context_max: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 512,
            context_max: 20,
        }
    }
}

/// TTS stage tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsConfig {
    /// Voice identifier forwarded to the subprocess on each request.
    pub voice_id: Option<String>,
    /// Declared output sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum child respawns within the 30s restart window.
    pub max_restarts: u32,
    /// Command line used to spawn the TTS child, e.g. `["tts-engine"]`.
    /// Empty until `TTS_COMMAND` is set; the engine refuses to start the
    /// TTS stage without it.
    pub command: Vec<String>,
    /// How long a session may go without starting a turn before the
    /// runtime sends an idle heartbeat ping to the TTS child.
    pub idle_ping_ms: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_id: None,
            sample_rate: 24_000,
            max_restarts: 3,
            command: Vec::new(),
            idle_ping_ms: 30_000,
        }
    }
}

/// STT stage tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SttConfig {
    /// Sampling temperature (pinned to 0 for determinism).
    pub temperature: f32,
    /// Inference device hint.
    pub device: SttDevice,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            device: SttDevice::Auto,
        }
    }
}

/// STT device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttDevice {
    Auto,
    Cpu,
    Gpu,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            vad: VadConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            stt: SttConfig::default(),
            system_prompt: String::new(),
            log_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. Invalid values are a `Config` error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_env("PORT")? {
            config.port = v;
        }
        if let Some(v) = parse_env("VAD_MIN_SILENCE_MS")? {
            config.vad.min_silence_ms = v;
        }
        if let Some(v) = parse_env("VAD_START_MS")? {
            config.vad.start_ms = v;
        }
        if let Some(v) = parse_env("VAD_PAD_MS")? {
            config.vad.pad_ms = v;
        }
        if let Some(v) = parse_env("LLM_TEMPERATURE")? {
            config.llm.temperature = v;
        }
        if let Some(v) = parse_env("LLM_MAX_TOKENS")? {
            config.llm.max_tokens = v;
        }
        if let Some(v) = parse_env("LLM_CONTEXT_MAX")? {
            config.llm.context_max = v;
        }
        if let Ok(v) = std::env::var("TTS_VOICE_ID") {
            config.tts.voice_id = Some(v);
        }
        if let Some(v) = parse_env("TTS_SAMPLE_RATE")? {
            config.tts.sample_rate = v;
        }
        if let Some(v) = parse_env("TTS_MAX_RESTARTS")? {
            config.tts.max_restarts = v;
        }
        if let Ok(v) = std::env::var("TTS_COMMAND") {
            config.tts.command = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = parse_env("TTS_IDLE_PING_MS")? {
            config.tts.idle_ping_ms = v;
        }
        if let Some(v) = parse_env("STT_TEMPERATURE")? {
            config.stt.temperature = v;
        }
        if let Ok(v) = std::env::var("STT_DEVICE") {
            config.stt.device = match v.as_str() {
                "auto" => SttDevice::Auto,
                "cpu" => SttDevice::Cpu,
                "gpu" => SttDevice::Gpu,
                other => {
                    return Err(EngineError::Config(format!(
                        "invalid STT_DEVICE '{other}'; expected auto|cpu|gpu"
                    )));
                }
            };
        }
        if let Ok(v) = std::env::var("SYSTEM_PROMPT") {
            config.system_prompt = v;
        }
        if let Ok(v) = std::env::var("LOG_DIR") {
            config.log_dir = Some(v);
        }

        Ok(config)
    }
}

/// Parse an environment variable via `FromStr`, mapping failures to
/// `EngineError::Config` with the variable name attached.
fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("invalid {name}: {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(EngineError::Config(format!("{name} is not valid UTF-8")))
        }
    }
}
