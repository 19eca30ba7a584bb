//! TTS subprocess wire protocol: line-delimited JSON over the child's
//! stdin/stdout.

use serde::{Deserialize, Serialize};

/// One synthesis request, written as a single JSON line to the child's stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// One line of child stdout, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynthesizeResponse {
    Started,
    AudioChunk {
        /// Base64-encoded PCM16 mono samples, at most 16 KiB decoded.
        data: String,
    },
    Stopped,
    Eof,
    Error {
        message: String,
    },
}

/// Decoded-chunk size ceiling; a chunk larger than this is a protocol
/// violation on the child's part.
pub const MAX_AUDIO_CHUNK_BYTES: usize = 16 * 1024;

impl SynthesizeResponse {
    /// Decode an `AudioChunk`'s base64 payload, enforcing the size ceiling.
    pub fn decode_audio_chunk(&self) -> crate::error::Result<Vec<u8>> {
        use base64::Engine;
        match self {
            SynthesizeResponse::AudioChunk { data } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| crate::error::EngineError::Protocol(format!(
                        "invalid base64 audio chunk: {e}"
                    )))?;
                if bytes.len() > MAX_AUDIO_CHUNK_BYTES {
                    return Err(crate::error::EngineError::Protocol(format!(
                        "audio chunk of {} bytes exceeds {} byte limit",
                        bytes.len(),
                        MAX_AUDIO_CHUNK_BYTES
                    )));
                }
                Ok(bytes)
            }
            _ => Err(crate::error::EngineError::Protocol(
                "decode_audio_chunk called on a non-audio-chunk response".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_absent_optionals() {
        let req = SynthesizeRequest {
            text: "hello".into(),
            voice_id: None,
            language: None,
            speed: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"text":"hello"}"#);
    }

    #[test]
    fn response_round_trips_through_json() {
        let resp = SynthesizeResponse::AudioChunk {
            data: "AQID".into(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: SynthesizeResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, back);
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        use base64::Engine;
        let huge = vec![0u8; MAX_AUDIO_CHUNK_BYTES + 1];
        let encoded = base64::engine::general_purpose::STANDARD.encode(huge);
        let resp = SynthesizeResponse::AudioChunk { data: encoded };
        assert!(resp.decode_audio_chunk().is_err());
    }

    #[test]
    fn error_variant_parses_from_json() {
        let json = r#"{"kind":"error","message":"voice not found"}"#;
        let resp: SynthesizeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp,
            SynthesizeResponse::Error {
                message: "voice not found".into()
            }
        );
    }
}
