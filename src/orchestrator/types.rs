use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Transcription,
    Response,
    Synthesis,
    /// The outbound sink feeding the transport writer.
    Output,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Transcription => "transcription",
            StageKind::Response => "response",
            StageKind::Synthesis => "synthesis",
            StageKind::Output => "output",
        }
    }
}

/// Raw recognition result yielded by a transcription stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub is_final: bool,
}

impl Transcription {
    pub fn final_text<T: Into<String>>(text: T) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn interim<T: Into<String>>(text: T) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}

/// Recognized client speech, tagged with the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub session_id: String,
    pub text: String,
    /// Interim hypotheses are only logged; final ones drive a response.
    pub is_final: bool,
}

impl Utterance {
    pub fn new<S: Into<String>>(session_id: S, transcription: Transcription) -> Self {
        Self {
            session_id: session_id.into(),
            text: transcription.text,
            is_final: transcription.is_final,
        }
    }
}

/// One streamed piece of generated reply text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub session_id: String,
    pub text: String,
    /// Sequence number of the utterance this chunk answers.
    pub utterance_seq: u64,
}
