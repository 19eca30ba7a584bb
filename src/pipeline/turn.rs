//! The per-turn state machine.

use std::time::Instant;

use super::messages::TurnId;

/// Turn lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Listening,
    Transcribing,
    Thinking,
    Speaking,
    Interrupted,
    Done,
}

/// One user utterance + one bot reply.
///
/// Created by the Turn Controller on the first `VadStartFrame` observed
/// from `IDLE`; mutated only by the Turn Controller; retired on `Done`
/// or `Interrupted`.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    pub state: TurnState,
    pub user_text: String,
    pub assistant_text: String,
    /// Count of `assistant_text` bytes whose synthesized audio has
    /// actually been emitted downstream. This is the cursor used for
    /// character-accurate truncation on interruption.
    pub chars_spoken: usize,
    pub created_at: Instant,
    pub first_audio_emitted_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl Turn {
    #[must_use]
    pub fn new(id: TurnId, created_at: Instant) -> Self {
        Self {
            id,
            state: TurnState::Listening,
            user_text: String::new(),
            assistant_text: String::new(),
            chars_spoken: 0,
            created_at,
            first_audio_emitted_at: None,
            finished_at: None,
        }
    }

    /// The textual prefix of `assistant_text` whose audio was actually
    /// heard by the user — the only text safe to commit on interruption.
    #[must_use]
    pub fn spoken_prefix(&self) -> &str {
        let byte_cut = self
            .chars_spoken
            .min(self.assistant_text.len());
        // `chars_spoken` is reported by the Sentence Aggregator in whole
        // utterance units, so it always lands on a char boundary; guard
        // against a stale cursor from a prior aggregator revision anyway.
        let mut cut = byte_cut;
        while cut > 0 && !self.assistant_text.is_char_boundary(cut) {
            cut -= 1;
        }
        &self.assistant_text[..cut]
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            TurnState::Listening | TurnState::Transcribing | TurnState::Thinking | TurnState::Speaking
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spoken_prefix_is_truncated_to_cursor() {
        let mut turn = Turn::new(1, Instant::now());
        turn.assistant_text = "Certainly, let me explain.".into();
        turn.chars_spoken = 10;
        assert_eq!(turn.spoken_prefix(), "Certainly,");
    }

    #[test]
    fn spoken_prefix_is_full_text_when_cursor_past_end() {
        let mut turn = Turn::new(1, Instant::now());
        turn.assistant_text = "Four.".into();
        turn.chars_spoken = 999;
        assert_eq!(turn.spoken_prefix(), "Four.");
    }

    #[test]
    fn spoken_prefix_is_empty_before_any_audio() {
        let mut turn = Turn::new(1, Instant::now());
        turn.assistant_text = "Four.".into();
        assert_eq!(turn.spoken_prefix(), "");
    }
}
