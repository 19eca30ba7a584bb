//! Turn Controller: the pipeline's only piece of cross-turn state.
//!
//! Owns the active [`Turn`], assembles LLM prompts from the
//! [`ContextStore`], commits conversation history at turn boundaries, and
//! decides when incoming speech constitutes a barge-in.

use tokio::sync::broadcast;
use tracing::info;

use crate::context::ContextStore;
use crate::pipeline::messages::{InterruptFrame, InterruptReason, PromptFrame, TurnId};
use crate::pipeline::turn::{Turn, TurnState};

/// Drives the turn state machine and conversation context for one session.
pub struct TurnController {
    context: ContextStore,
    current: Option<Turn>,
    next_turn_id: TurnId,
    interrupt_tx: broadcast::Sender<InterruptFrame>,
}

impl TurnController {
    #[must_use]
    pub fn new(context: ContextStore, interrupt_tx: broadcast::Sender<InterruptFrame>) -> Self {
        Self {
            context,
            current: None,
            next_turn_id: 1,
            interrupt_tx,
        }
    }

    /// A fresh receiver on the interrupt side-channel, for stages to
    /// subscribe to before starting work on a turn.
    #[must_use]
    pub fn subscribe_interrupts(&self) -> broadcast::Receiver<InterruptFrame> {
        self.interrupt_tx.subscribe()
    }

    #[must_use]
    pub fn current_turn(&self) -> Option<&Turn> {
        self.current.as_ref()
    }

    /// A `VadStartFrame` arrived. If no turn is active, start one
    /// (`Listening`). If a turn is active and already past `Listening`
    /// (i.e. the bot is thinking or speaking), this is a barge-in: emit
    /// an `InterruptFrame` for the in-flight turn, commit its
    /// spoken-so-far text, and start a fresh turn for the new speech.
    pub fn on_vad_start(&mut self, now: std::time::Instant) -> TurnId {
        if let Some(turn) = &self.current {
            if turn.state != TurnState::Listening {
                self.interrupt_current(InterruptReason::UserSpeech);
            } else {
                return turn.id;
            }
        }
        self.start_new_turn(now)
    }

    fn start_new_turn(&mut self, now: std::time::Instant) -> TurnId {
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        self.current = Some(Turn::new(id, now));
        id
    }

    /// STT produced a final transcript: record it, move to `Thinking`, and
    /// assemble the prompt to send to the LLM stage.
    pub fn on_transcript_final(&mut self, turn_id: TurnId, text: String) -> Option<PromptFrame> {
        let turn = self.current.as_mut().filter(|t| t.id == turn_id)?;
        turn.user_text = text;
        turn.state = TurnState::Thinking;

        let mut messages = self.context.snapshot();
        messages.push(crate::pipeline::messages::PromptMessage {
            role: crate::pipeline::messages::Role::User,
            text: turn.user_text.clone(),
        });

        Some(PromptFrame {
            seq: 0,
            turn: turn_id,
            messages,
        })
    }

    /// The LLM streamed another delta; track it on the turn and move to
    /// `Speaking` on the first one (the Sentence Aggregator / TTS Parent
    /// own the actual playback, this just keeps `assistant_text` current
    /// for truncation and context-commit purposes).
    pub fn on_llm_delta(&mut self, turn_id: TurnId, delta_text: &str) {
        if let Some(turn) = self.current.as_mut().filter(|t| t.id == turn_id) {
            turn.assistant_text.push_str(delta_text);
            if turn.state == TurnState::Thinking {
                turn.state = TurnState::Speaking;
            }
        }
    }

    /// TTS reported how many characters it actually spoke.
    pub fn on_tts_progress(&mut self, turn_id: TurnId, chars_spoken: usize) {
        if let Some(turn) = self.current.as_mut().filter(|t| t.id == turn_id) {
            turn.chars_spoken = chars_spoken;
        }
    }

    /// The turn completed naturally (TTS finished speaking the full
    /// reply with no interruption): commit it to context and retire it.
    pub fn on_turn_done(&mut self, turn_id: TurnId, now: std::time::Instant) {
        if let Some(mut turn) = self.current.take() {
            if turn.id != turn_id {
                self.current = Some(turn);
                return;
            }
            turn.state = TurnState::Done;
            turn.finished_at = Some(now);
            self.commit(&turn);
        }
    }

    /// Interrupt the in-flight turn (if any): broadcast the cancellation,
    /// commit only the spoken prefix, and retire it as `Interrupted`.
    pub fn interrupt_current(&mut self, reason: InterruptReason) {
        let Some(mut turn) = self.current.take() else {
            return;
        };
        info!(turn = turn.id, reason = ?reason, "interrupting in-flight turn");
        let _ = self.interrupt_tx.send(InterruptFrame {
            turn: turn.id,
            reason,
        });
        turn.state = TurnState::Interrupted;
        turn.assistant_text = turn.spoken_prefix().to_string();
        self.commit(&turn);
    }

    fn commit(&mut self, turn: &Turn) {
        self.context.append_user(turn.user_text.clone());
        self.context.append_assistant(turn.assistant_text.clone());
    }

    #[must_use]
    pub fn context(&self) -> &ContextStore {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn controller() -> TurnController {
        let (tx, _rx) = broadcast::channel(8);
        TurnController::new(ContextStore::new("sys", 20), tx)
    }

    #[test]
    fn happy_path_commits_full_reply_on_done() {
        let mut ctl = controller();
        let now = Instant::now();
        let turn_id = ctl.on_vad_start(now);
        ctl.on_transcript_final(turn_id, "2+2?".into());
        ctl.on_llm_delta(turn_id, "Four.");
        ctl.on_tts_progress(turn_id, 5);
        ctl.on_turn_done(turn_id, now);

        let snap = ctl.context().snapshot();
        assert_eq!(snap[1].text, "2+2?");
        assert_eq!(snap[2].text, "Four.");
        assert!(ctl.current_turn().is_none());
    }

    #[test]
    fn barge_in_commits_only_spoken_prefix() {
        let mut ctl = controller();
        let now = Instant::now();
        let turn_id = ctl.on_vad_start(now);
        ctl.on_transcript_final(turn_id, "tell me a story".into());
        ctl.on_llm_delta(turn_id, "Once upon a time, there was a");
        ctl.on_tts_progress(turn_id, 10); // only "Once upon " actually spoken

        // New speech arrives mid-reply: this is a barge-in.
        let new_turn_id = ctl.on_vad_start(now);
        assert_ne!(new_turn_id, turn_id);

        let snap = ctl.context().snapshot();
        assert_eq!(snap[1].text, "tell me a story");
        assert_eq!(snap[2].text, "Once upon ");
    }

    #[test]
    fn vad_start_while_listening_reuses_same_turn() {
        let mut ctl = controller();
        let now = Instant::now();
        let first = ctl.on_vad_start(now);
        let second = ctl.on_vad_start(now);
        assert_eq!(first, second);
    }

    #[test]
    fn stale_turn_done_is_ignored() {
        let mut ctl = controller();
        let now = Instant::now();
        let turn_id = ctl.on_vad_start(now);
        ctl.on_turn_done(turn_id + 999, now);
        assert!(ctl.current_turn().is_some());
    }
}
