//! Error taxonomy for the voice pipeline.
//!
//! Every variant maps to a stable wire token via [`EngineError::kind`] so
//! the transport can place it verbatim into an `ErrorFrame`.

/// Top-level error type for the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed client frame; the session cannot continue.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid startup configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A capability provider (STT/LLM/TTS) failed to initialize.
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Per-turn speech-to-text failure.
    #[error("STT error: {0}")]
    Stt(String),

    /// Per-turn language-model failure.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Per-turn text-to-speech failure.
    #[error("TTS error: {0}")]
    Tts(String),

    /// A per-stage deadline was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The TTS subprocess exited unexpectedly.
    #[error("TTS child exited: {0}")]
    ChildExit(String),

    /// A downstream queue stayed saturated past its backpressure window.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// I/O failure (subprocess pipes, transport socket).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal channel send/receive failure (a stage dropped its receiver).
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse recoverability used by the Turn Controller and Pipeline Runtime
/// to decide between "abort the turn" and "tear down the session".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverable {
    /// The session continues; the current turn aborts and the client sees
    /// one `ErrorFrame { recoverable: true }`.
    Yes,
    /// The session is terminated with a terminal `ErrorFrame`.
    No,
}

impl EngineError {
    /// Stable wire token placed in `ErrorFrame.kind`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Config(_) => "config",
            Self::ModelLoad(_) => "model_load",
            Self::Stt(_) => "stt",
            Self::Llm(_) => "llm",
            Self::Tts(_) => "tts",
            Self::Timeout(_) => "timeout",
            Self::ChildExit(_) => "child_exit",
            Self::Backpressure(_) => "backpressure",
            Self::Io(_) => "io",
            Self::Channel(_) => "channel",
        }
    }

    /// Default recoverability for this error kind.
    ///
    /// Callers that have turn-specific context (e.g. a `ChildExit` that
    /// exceeded `max_restarts`) should override this rather than rely on
    /// the default blindly.
    #[must_use]
    pub fn default_recoverable(&self) -> Recoverable {
        match self {
            Self::Protocol(_) | Self::Config(_) | Self::ModelLoad(_) => Recoverable::No,
            Self::Stt(_) | Self::Llm(_) | Self::Tts(_) | Self::Timeout(_) => Recoverable::Yes,
            Self::ChildExit(_) => Recoverable::Yes,
            Self::Backpressure(_) => Recoverable::Yes,
            Self::Io(_) | Self::Channel(_) => Recoverable::No,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tokens_are_stable() {
        assert_eq!(EngineError::Stt("x".into()).kind(), "stt");
        assert_eq!(EngineError::Tts("x".into()).kind(), "tts");
        assert_eq!(EngineError::ChildExit("x".into()).kind(), "child_exit");
        assert_eq!(EngineError::Protocol("x".into()).kind(), "protocol");
    }

    #[test]
    fn protocol_and_config_are_unrecoverable_by_default() {
        assert_eq!(
            EngineError::Protocol("x".into()).default_recoverable(),
            Recoverable::No
        );
        assert_eq!(
            EngineError::Config("x".into()).default_recoverable(),
            Recoverable::No
        );
    }

    #[test]
    fn per_turn_errors_are_recoverable_by_default() {
        for e in [
            EngineError::Stt("x".into()),
            EngineError::Llm("x".into()),
            EngineError::Tts("x".into()),
            EngineError::Timeout("x".into()),
        ] {
            assert_eq!(e.default_recoverable(), Recoverable::Yes);
        }
    }
}
