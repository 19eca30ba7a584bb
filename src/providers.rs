//! Pluggable capability provider contracts.
//!
//! Concrete model loading (a Whisper-family ASR, a chat LLM) is out of
//! scope; these traits are the contracts each stage drives, plus
//! deterministic fakes the engine's own test suite uses so pipeline
//! logic can be exercised without real inference.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Speech-to-text engine contract.
///
/// A single call transcribes one complete utterance. Determinism
/// (temperature pinned to 0) is a property of the concrete
/// implementation, not of this trait.
#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn transcribe(&self, pcm_bytes: &[u8], sample_rate: u32) -> Result<String>;
}

/// Conversational language-model contract.
///
/// Streams `delta_text` chunks onto `tx` and returns once generation is
/// complete (the caller is responsible for emitting `LLMDoneFrame`).
/// Implementations must stop producing deltas promptly if `tx` is
/// dropped (the stage drops it to cancel generation).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        messages: &[crate::pipeline::messages::PromptMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<()>;
}

/// A deterministic STT fake keyed by exact input bytes, for tests.
///
/// Falls back to `default_text` for unrecognized input so tests can
/// exercise the "no match" path without wiring every possible input.
pub struct FixedStt {
    table: std::collections::HashMap<Vec<u8>, String>,
    default_text: String,
}

impl FixedStt {
    #[must_use]
    pub fn new(default_text: impl Into<String>) -> Self {
        Self {
            table: std::collections::HashMap::new(),
            default_text: default_text.into(),
        }
    }

    #[must_use]
    pub fn with_mapping(mut self, pcm_bytes: Vec<u8>, text: impl Into<String>) -> Self {
        self.table.insert(pcm_bytes, text.into());
        self
    }
}

#[async_trait]
impl SttEngine for FixedStt {
    async fn transcribe(&self, pcm_bytes: &[u8], _sample_rate: u32) -> Result<String> {
        Ok(self
            .table
            .get(pcm_bytes)
            .cloned()
            .unwrap_or_else(|| self.default_text.clone()))
    }
}

/// A deterministic LLM fake that replies with a fixed string, streamed
/// one word at a time, for tests.
pub struct FixedLlm {
    reply: String,
}

impl FixedLlm {
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for FixedLlm {
    async fn generate(
        &self,
        _messages: &[crate::pipeline::messages::PromptMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<()> {
        for word in self.reply.split_inclusive(' ') {
            if tx.send(word.to_string()).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_stt_returns_mapped_text() {
        let stt = FixedStt::new("").with_mapping(vec![1, 2, 3], "hello");
        let text = stt.transcribe(&[1, 2, 3], 16_000).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn fixed_stt_falls_back_to_default() {
        let stt = FixedStt::new("unmatched");
        let text = stt.transcribe(&[9, 9, 9], 16_000).await.unwrap();
        assert_eq!(text, "unmatched");
    }

    #[tokio::test]
    async fn fixed_llm_streams_full_reply() {
        let llm = FixedLlm::new("Four.");
        let (tx, mut rx) = mpsc::channel(8);
        llm.generate(&[], tx).await.unwrap();
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk);
        }
        assert_eq!(out, "Four.");
    }
}
