//! Sentence Aggregator: buffers LLM token deltas into TTS-friendly
//! utterances at natural boundaries.

/// Terminal punctuation that can end a boundary when followed by
/// whitespace or end-of-stream.
const TERMINAL_PUNCTUATION: [char; 5] = ['.', '!', '?', ';', ':'];

/// Emit threshold: once the buffer exceeds this many characters, the
/// next comma or whitespace position is used as a flush point.
const MAX_CHARS: usize = 180;

/// Accumulates streamed token deltas and yields utterance-sized chunks.
#[derive(Debug, Default)]
pub struct SentenceAggregator {
    buffer: String,
}

/// What to do with a freshly pushed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorEvent {
    /// No boundary reached yet; keep buffering.
    Buffering,
    /// A boundary was reached; emit this utterance text.
    Emit(String),
}

impl SentenceAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token delta. Whether the following token starts with
    /// whitespace is unknown until the next call, so this is
    /// approximated by checking whether the delta itself ends in
    /// whitespace after terminal punctuation, plus an explicit flush on
    /// `finish()`.
    pub fn push(&mut self, delta_text: &str) -> AggregatorEvent {
        self.buffer.push_str(delta_text);

        if let Some(boundary) = self.find_punctuation_boundary() {
            let emit = self.buffer[..=boundary].trim().to_string();
            self.buffer.drain(..=boundary);
            if !emit.is_empty() {
                return AggregatorEvent::Emit(emit);
            }
            return AggregatorEvent::Buffering;
        }

        if self.buffer.chars().count() > MAX_CHARS {
            if let Some(cut) = self.find_overflow_cut() {
                let emit = self.buffer[..=cut].trim().to_string();
                self.buffer.drain(..=cut);
                if !emit.is_empty() {
                    return AggregatorEvent::Emit(emit);
                }
            }
        }

        AggregatorEvent::Buffering
    }

    /// `LLMDoneFrame` arrived: flush whatever remains (may be empty).
    pub fn finish(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        let trimmed = remaining.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Find the last terminal-punctuation character followed by
    /// whitespace (or at end of buffer, treated as end-of-stream-like
    /// since more tokens may still arrive — only cut mid-buffer when a
    /// trailing space confirms the clause actually ended).
    fn find_punctuation_boundary(&self) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        for (i, ch) in self.buffer.char_indices() {
            if TERMINAL_PUNCTUATION.contains(&ch) {
                let next_idx = i + ch.len_utf8();
                if next_idx >= bytes.len() {
                    // Punctuation is the last thing we've seen so far;
                    // wait for the next delta to confirm whitespace
                    // follows, unless the buffer already ends exactly
                    // here and nothing more is pending (handled by
                    // `finish`).
                    continue;
                }
                if self.buffer[next_idx..]
                    .chars()
                    .next()
                    .is_some_and(char::is_whitespace)
                {
                    return Some(i);
                }
            }
        }
        None
    }

    /// Find the latest comma or whitespace position to cut at once the
    /// buffer has grown past `MAX_CHARS`.
    fn find_overflow_cut(&self) -> Option<usize> {
        self.buffer
            .char_indices()
            .filter(|&(_, c)| c == ',' || c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8() - 1)
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_on_terminal_punctuation_followed_by_space() {
        let mut agg = SentenceAggregator::new();
        assert_eq!(agg.push("Four"), AggregatorEvent::Buffering);
        assert_eq!(
            agg.push(". Next sentence"),
            AggregatorEvent::Emit("Four.".to_string())
        );
    }

    #[test]
    fn does_not_split_mid_stream_without_trailing_space() {
        let mut agg = SentenceAggregator::new();
        assert_eq!(agg.push("Four."), AggregatorEvent::Buffering);
    }

    #[test]
    fn flushes_remainder_on_finish_even_without_punctuation() {
        let mut agg = SentenceAggregator::new();
        agg.push("no terminator here");
        assert_eq!(agg.finish(), Some("no terminator here".to_string()));
    }

    #[test]
    fn finish_with_empty_buffer_yields_none() {
        let mut agg = SentenceAggregator::new();
        assert_eq!(agg.finish(), None);
    }

    #[test]
    fn overflow_emits_at_latest_comma_or_whitespace_past_max_chars() {
        let mut agg = SentenceAggregator::new();
        let long_clause = "word ".repeat(40); // 200 chars, no punctuation
        let mut emitted = None;
        for chunk in long_clause.split_inclusive(' ') {
            if let AggregatorEvent::Emit(text) = agg.push(chunk) {
                emitted = Some(text);
                break;
            }
        }
        assert!(emitted.is_some());
        assert!(emitted.unwrap().len() <= 185);
    }

    #[test]
    fn multiple_sentences_in_one_delta_emit_first_only() {
        let mut agg = SentenceAggregator::new();
        match agg.push("Hi. How are you") {
            AggregatorEvent::Emit(text) => assert_eq!(text, "Hi."),
            AggregatorEvent::Buffering => panic!("expected an emit"),
        }
    }
}
