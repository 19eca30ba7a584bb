//! `duet`: a real-time voice-conversation orchestration engine.
//!
//! Wires together voice-activity detection, speech-to-text, an LLM, and
//! text-to-speech into one turn-taking pipeline with barge-in support.

pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod providers;
pub mod stt;
pub mod transport;
pub mod tts;
pub mod vad;

pub use error::{EngineError, Result};
