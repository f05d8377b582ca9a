use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::audio::{AudioChunk, InputAudioConfig, OutputAudioConfig};
use crate::error::StageError;
use crate::orchestrator::types::{ResponseChunk, Transcription, Utterance};
use crate::session::profile::{ConversationProfile, VoiceSelection};

/// Speech-to-text capability for a single session.
///
/// Audio is pushed through `feed`; recognitions come out of the stream
/// returned by `transcriptions`, which is taken once per session.
#[async_trait]
pub trait TranscriptionStage: Send {
    fn transcriptions(&mut self) -> BoxStream<'static, Result<Transcription, StageError>>;

    async fn feed(&mut self, chunk: AudioChunk) -> Result<(), StageError>;

    /// Called once after the last chunk. Implementations flush buffered audio
    /// and end the transcription stream.
    async fn finish(&mut self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Streamed reply generation, seeded with the session's profile.
pub trait ResponseStage: Send {
    fn respond<'a>(
        &'a mut self,
        utterance: &'a Utterance,
    ) -> BoxStream<'a, Result<String, StageError>>;
}

/// Text-to-speech for one reply chunk at a time.
pub trait SynthesisStage: Send {
    fn synthesize<'a>(
        &'a mut self,
        chunk: &'a ResponseChunk,
    ) -> BoxStream<'a, Result<AudioChunk, StageError>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthesisOptions {
    /// Emit every chunk as a self-contained WAV container.
    pub encode_as_wav: bool,
}

pub trait TranscriptionFactory: Send + Sync {
    fn create(&self, input: &InputAudioConfig) -> anyhow::Result<Box<dyn TranscriptionStage>>;
}

pub trait ResponseFactory: Send + Sync {
    fn create(&self, profile: &ConversationProfile) -> anyhow::Result<Box<dyn ResponseStage>>;
}

pub trait SynthesisFactory: Send + Sync {
    fn create(
        &self,
        output: &OutputAudioConfig,
        voice: &VoiceSelection,
        options: SynthesisOptions,
    ) -> anyhow::Result<Box<dyn SynthesisStage>>;
}

impl<F> TranscriptionFactory for F
where
    F: Fn(&InputAudioConfig) -> anyhow::Result<Box<dyn TranscriptionStage>> + Send + Sync,
{
    fn create(&self, input: &InputAudioConfig) -> anyhow::Result<Box<dyn TranscriptionStage>> {
        self(input)
    }
}

impl<F> ResponseFactory for F
where
    F: Fn(&ConversationProfile) -> anyhow::Result<Box<dyn ResponseStage>> + Send + Sync,
{
    fn create(&self, profile: &ConversationProfile) -> anyhow::Result<Box<dyn ResponseStage>> {
        self(profile)
    }
}

impl<F> SynthesisFactory for F
where
    F: Fn(
            &OutputAudioConfig,
            &VoiceSelection,
            SynthesisOptions,
        ) -> anyhow::Result<Box<dyn SynthesisStage>>
        + Send
        + Sync,
{
    fn create(
        &self,
        output: &OutputAudioConfig,
        voice: &VoiceSelection,
        options: SynthesisOptions,
    ) -> anyhow::Result<Box<dyn SynthesisStage>> {
        self(output, voice, options)
    }
}

/// The three stages a session drives, owned exclusively by that session.
pub struct PipelineStages {
    pub transcription: Box<dyn TranscriptionStage>,
    pub response: Box<dyn ResponseStage>,
    pub synthesis: Box<dyn SynthesisStage>,
}

impl std::fmt::Debug for PipelineStages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStages").finish_non_exhaustive()
    }
}
