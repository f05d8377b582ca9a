//! 音频格式定义与输出管道。

pub mod codec;
pub mod sink;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub use sink::{OutboundFrame, OutputSink};

/// Raw audio payload. Position in the stream is implied by arrival order.
pub type AudioChunk = Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    #[serde(alias = "pcm16")]
    Linear16,
    Mulaw,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Linear16 => "linear16",
            AudioEncoding::Mulaw => "mulaw",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Linear16 => 2,
            AudioEncoding::Mulaw => 1,
        }
    }
}

/// Client -> server audio format. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAudioConfig {
    pub sampling_rate: u32,
    pub audio_encoding: AudioEncoding,
    pub chunk_size: usize,
    #[serde(default)]
    pub downsampling: Option<u32>,
}

impl InputAudioConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sampling_rate == 0 {
            return Err(SessionError::configuration(
                "input sampling rate must be greater than zero",
            ));
        }
        if self.chunk_size == 0 {
            return Err(SessionError::configuration(
                "input chunk size must be greater than zero",
            ));
        }
        if self.downsampling == Some(0) {
            return Err(SessionError::configuration(
                "input downsampling factor must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Sampling rate seen by the transcription stage after downsampling.
    pub fn effective_sampling_rate(&self) -> u32 {
        match self.downsampling {
            Some(factor) if factor > 1 => self.sampling_rate / factor,
            _ => self.sampling_rate,
        }
    }
}

/// Server -> client audio format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAudioConfig {
    pub sampling_rate: u32,
    pub audio_encoding: AudioEncoding,
}

impl OutputAudioConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sampling_rate == 0 {
            return Err(SessionError::configuration(
                "output sampling rate must be greater than zero",
            ));
        }
        Ok(())
    }
}
