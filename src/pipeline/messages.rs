//! Frame types passed between pipeline stages.
//!
//! Frames are a closed tagged union: stages pattern-match on the
//! variant rather than relying on subclassing or `dyn` dispatch.

use std::time::Instant;

/// Monotonic sequence id, unique within one turn, strictly increasing
/// per stage.
pub type SeqId = u64;

/// Turn identifier. `0` is reserved and never assigned to a real turn.
pub type TurnId = u64;

/// Raw audio captured from the client.
#[derive(Debug, Clone)]
pub struct AudioInFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    pub pcm_bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Instant,
}

/// Synthesized audio ready for playback on the client.
#[derive(Debug, Clone)]
pub struct AudioOutFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    pub pcm_bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Speech boundary markers emitted by the VAD Gate.
#[derive(Debug, Clone)]
pub struct VadStartFrame {
    pub seq: SeqId,
    pub turn: TurnId,
}

#[derive(Debug, Clone)]
pub struct VadEndFrame {
    pub seq: SeqId,
    pub turn: TurnId,
}

/// A segmented utterance ready for STT.
#[derive(Debug, Clone)]
pub struct UserSpeechFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    pub pcm_bytes: Vec<u8>,
    pub sample_rate: u32,
}

/// STT output. Non-final frames are informational and MAY be suppressed
/// by a transport that does not surface live captions.
#[derive(Debug, Clone)]
pub struct TranscriptFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    pub text: String,
    pub is_final: bool,
}

/// One message in an assembled LLM prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub text: String,
}

/// Conversation role, matching the Context Store's message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Assembled LLM input: system + history + the new user turn.
#[derive(Debug, Clone)]
pub struct PromptFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    pub messages: Vec<PromptMessage>,
}

/// One streamed chunk of LLM output.
#[derive(Debug, Clone)]
pub struct LlmTokenFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    pub delta_text: String,
}

/// End of the LLM stream for the current turn.
#[derive(Debug, Clone)]
pub struct LlmDoneFrame {
    pub seq: SeqId,
    pub turn: TurnId,
}

/// A sentence-granular chunk ready for TTS.
#[derive(Debug, Clone)]
pub struct UtteranceFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    pub text: String,
}

/// Audio stream boundaries from the TTS Parent.
#[derive(Debug, Clone)]
pub struct TtsStartedFrame {
    pub seq: SeqId,
    pub turn: TurnId,
}

#[derive(Debug, Clone)]
pub struct TtsStoppedFrame {
    pub seq: SeqId,
    pub turn: TurnId,
    /// Number of UTF-8 bytes of utterance text whose audio was fully
    /// emitted downstream. Used by the Turn Controller to compute
    /// character-accurate truncation on interruption.
    pub chars_spoken: usize,
}

/// Signal to cancel in-flight generation/playback for a turn. This is
/// the only mechanism for user interruption and travels on a dedicated
/// side channel, never through the forward data-flow queues.
#[derive(Debug, Clone)]
pub struct InterruptFrame {
    pub turn: TurnId,
    pub reason: InterruptReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// The VAD gate detected new speech while a reply was in flight.
    UserSpeech,
    /// The client sent an explicit interrupt control message.
    ClientRequest,
}

/// A per-turn or session-fatal error surfaced to the client.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorFrame {
    pub turn: Option<TurnId>,
    pub kind: &'static str,
    pub message: String,
    pub recoverable: bool,
}

/// Lifecycle control: start/stop/drain. Does not belong to any turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    Hello,
    Accept,
    Drain,
    Start,
    Stop,
}

#[derive(Debug, Clone)]
pub struct SystemFrame {
    pub kind: SystemKind,
}

/// The full closed set of frames flowing through the pipeline.
#[derive(Debug, Clone)]
pub enum Frame {
    AudioIn(AudioInFrame),
    AudioOut(AudioOutFrame),
    VadStart(VadStartFrame),
    VadEnd(VadEndFrame),
    UserSpeech(UserSpeechFrame),
    Transcript(TranscriptFrame),
    Prompt(PromptFrame),
    LlmToken(LlmTokenFrame),
    LlmDone(LlmDoneFrame),
    Utterance(UtteranceFrame),
    TtsStarted(TtsStartedFrame),
    TtsStopped(TtsStoppedFrame),
    Interrupt(InterruptFrame),
    Error(ErrorFrame),
    System(SystemFrame),
}

impl Frame {
    /// The owning turn, or `None` for `SystemFrame` (every other frame
    /// belongs to exactly one turn).
    #[must_use]
    pub fn turn_id(&self) -> Option<TurnId> {
        match self {
            Self::AudioIn(f) => Some(f.turn),
            Self::AudioOut(f) => Some(f.turn),
            Self::VadStart(f) => Some(f.turn),
            Self::VadEnd(f) => Some(f.turn),
            Self::UserSpeech(f) => Some(f.turn),
            Self::Transcript(f) => Some(f.turn),
            Self::Prompt(f) => Some(f.turn),
            Self::LlmToken(f) => Some(f.turn),
            Self::LlmDone(f) => Some(f.turn),
            Self::Utterance(f) => Some(f.turn),
            Self::TtsStarted(f) => Some(f.turn),
            Self::TtsStopped(f) => Some(f.turn),
            Self::Interrupt(f) => Some(f.turn),
            Self::Error(f) => f.turn,
            Self::System(_) => None,
        }
    }
}
