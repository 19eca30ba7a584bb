//! LLM Stage and Sentence Aggregator.

pub mod aggregator;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::pipeline::messages::{
    InterruptFrame, LlmDoneFrame, LlmTokenFrame, PromptFrame, SeqId, TurnId, UtteranceFrame,
};
use crate::providers::LlmProvider;
use aggregator::{AggregatorEvent, SentenceAggregator};

/// Backpressure bound: the LLM stage must not buffer more than this many
/// token deltas ahead of the Sentence Aggregator.
pub const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// LLM stage total generation timeout, measured from the first call.
pub const LLM_TOTAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
/// Timeout for the first token to arrive after generation starts.
pub const LLM_FIRST_TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Drive one turn's LLM generation: consume a `PromptFrame`, stream
/// `LlmTokenFrame`s downstream, then emit `LlmDoneFrame`. Cancellable via
/// `interrupt_rx` — on a matching `InterruptFrame` the provider future is
/// dropped, stopping generation within one step. Generation is also
/// aborted with `EngineError::Timeout` if the first token doesn't arrive
/// within `LLM_FIRST_TOKEN_TIMEOUT` or the whole turn runs past
/// `LLM_TOTAL_TIMEOUT`.
pub async fn run_llm_turn(
    provider: &dyn LlmProvider,
    prompt: &PromptFrame,
    token_tx: &mpsc::Sender<LlmTokenFrame>,
    mut interrupt_rx: broadcast::Receiver<InterruptFrame>,
) -> Result<bool> {
    let (delta_tx, mut delta_rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);
    let turn = prompt.turn;
    let messages = prompt.messages.clone();

    let gen_future = provider.generate(&messages, delta_tx);
    tokio::pin!(gen_future);

    let mut seq: SeqId = 0;
    let mut completed_naturally = false;
    let mut received_any = false;
    let total_deadline = Instant::now() + LLM_TOTAL_TIMEOUT;

    loop {
        let next_token_deadline = if received_any {
            total_deadline
        } else {
            std::cmp::min(total_deadline, Instant::now() + LLM_FIRST_TOKEN_TIMEOUT)
        };

        tokio::select! {
            biased;
            interrupt = interrupt_rx.recv() => {
                match interrupt {
                    Ok(frame) if frame.turn == turn => {
                        info!(turn, "LLM generation cancelled by interrupt");
                        return Ok(false);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => continue,
                }
            }
            () = tokio::time::sleep_until(next_token_deadline) => {
                return Err(EngineError::Timeout(format!(
                    "LLM generation for turn {turn} exceeded its deadline"
                )));
            }
            maybe_delta = delta_rx.recv() => {
                match maybe_delta {
                    Some(delta_text) => {
                        received_any = true;
                        seq += 1;
                        if token_tx
                            .send(LlmTokenFrame { seq, turn, delta_text })
                            .await
                            .is_err()
                        {
                            return Err(EngineError::Channel(
                                "sentence aggregator dropped its receiver".into(),
                            ));
                        }
                    }
                    None => {
                        completed_naturally = true;
                        break;
                    }
                }
            }
        }
    }

    if completed_naturally {
        // Drain the generation future's own result (errors surface here).
        let _ = gen_future.await;
    }

    Ok(true)
}

/// Run the Sentence Aggregator for one turn: consume `LlmTokenFrame`s,
/// emit `UtteranceFrame`s at natural boundaries, and flush the remainder
/// on `LlmDoneFrame`.
pub async fn run_aggregator_turn(
    mut token_rx: mpsc::Receiver<LlmTokenFrame>,
    utterance_tx: &mpsc::Sender<UtteranceFrame>,
    turn: TurnId,
) -> Result<LlmDoneFrame> {
    let mut aggregator = SentenceAggregator::new();
    let mut seq: SeqId = 0;
    let mut last_token_seq: SeqId = 0;

    while let Some(token) = token_rx.recv().await {
        last_token_seq = token.seq;
        if let AggregatorEvent::Emit(text) = aggregator.push(&token.delta_text) {
            seq += 1;
            if utterance_tx
                .send(UtteranceFrame { seq, turn, text })
                .await
                .is_err()
            {
                warn!(turn, "TTS stage dropped its receiver mid-aggregation");
                break;
            }
        }
    }

    if let Some(text) = aggregator.finish() {
        seq += 1;
        let _ = utterance_tx.send(UtteranceFrame { seq, turn, text }).await;
    }

    Ok(LlmDoneFrame {
        seq: last_token_seq,
        turn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::messages::{PromptMessage, Role};
    use crate::providers::FixedLlm;
    use async_trait::async_trait;

    /// An LLM provider that never produces a first token, for exercising
    /// the first-token deadline.
    struct SilentLlm;

    #[async_trait]
    impl LlmProvider for SilentLlm {
        async fn generate(
            &self,
            _messages: &[PromptMessage],
            _tx: mpsc::Sender<String>,
        ) -> Result<()> {
            tokio::time::sleep(LLM_FIRST_TOKEN_TIMEOUT + std::time::Duration::from_secs(1)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_llm_turn_streams_all_deltas_and_completes() {
        let provider = FixedLlm::new("Four. ");
        let prompt = PromptFrame {
            seq: 1,
            turn: 1,
            messages: vec![PromptMessage {
                role: Role::User,
                text: "2+2?".into(),
            }],
        };
        let (token_tx, mut token_rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let (interrupt_tx, interrupt_rx) = broadcast::channel(4);
        drop(interrupt_tx);

        let completed = run_llm_turn(&provider, &prompt, &token_tx, interrupt_rx)
            .await
            .unwrap();
        drop(token_tx);

        assert!(completed);
        let mut combined = String::new();
        while let Some(tok) = token_rx.recv().await {
            combined.push_str(&tok.delta_text);
        }
        assert_eq!(combined, "Four. ");
    }

    #[tokio::test]
    async fn run_llm_turn_cancels_on_matching_interrupt() {
        let provider = FixedLlm::new("this is a long reply that would take a while");
        let prompt = PromptFrame {
            seq: 1,
            turn: 5,
            messages: vec![],
        };
        let (token_tx, _token_rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let (interrupt_tx, interrupt_rx) = broadcast::channel(4);
        interrupt_tx
            .send(InterruptFrame {
                turn: 5,
                reason: crate::pipeline::messages::InterruptReason::UserSpeech,
            })
            .unwrap();

        let completed = run_llm_turn(&provider, &prompt, &token_tx, interrupt_rx)
            .await
            .unwrap();
        assert!(!completed);
    }

    #[tokio::test(start_paused = true)]
    async fn run_llm_turn_times_out_waiting_for_first_token() {
        let provider = SilentLlm;
        let prompt = PromptFrame {
            seq: 1,
            turn: 9,
            messages: vec![],
        };
        let (token_tx, _token_rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let (_interrupt_tx, interrupt_rx) = broadcast::channel(4);

        let err = run_llm_turn(&provider, &prompt, &token_tx, interrupt_rx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn aggregator_turn_emits_utterances_and_done_frame() {
        let (token_tx, token_rx) = mpsc::channel(8);
        let (utterance_tx, mut utterance_rx) = mpsc::channel(8);

        let handle = tokio::spawn(async move { run_aggregator_turn(token_rx, &utterance_tx, 3).await });

        token_tx
            .send(LlmTokenFrame {
                seq: 1,
                turn: 3,
                delta_text: "Four. ".into(),
            })
            .await
            .unwrap();
        drop(token_tx);

        let first = utterance_rx.recv().await.unwrap();
        assert_eq!(first.text, "Four.");

        let done = handle.await.unwrap().unwrap();
        assert_eq!(done.turn, 3);
    }

    #[tokio::test]
    async fn aggregator_turn_on_empty_reply_emits_nothing() {
        let (token_tx, token_rx) = mpsc::channel(8);
        let (utterance_tx, mut utterance_rx) = mpsc::channel(8);
        drop(token_tx);

        let done = run_aggregator_turn(token_rx, &utterance_tx, 9).await.unwrap();
        assert_eq!(done.turn, 9);
        assert!(utterance_rx.try_recv().is_err());
    }
}
