use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::audio::{InputAudioConfig, OutputAudioConfig};
use crate::error::SessionError;
use crate::orchestrator::builtin::{EchoResponder, EnergyTranscriber, ToneSynthesizer};
use crate::orchestrator::config::{
    ResponseBackend, StageBackends, SynthesisBackend, TranscriptionBackend,
};
use crate::orchestrator::traits::{
    PipelineStages, ResponseFactory, ResponseStage, SynthesisFactory, SynthesisOptions,
    SynthesisStage, TranscriptionFactory, TranscriptionStage,
};
use crate::session::profile::{ConversationProfile, VoiceSelection};

/// Maps each configured backend to the factory that constructs it.
#[derive(Clone, Default)]
pub struct StageRegistry {
    transcription: HashMap<TranscriptionBackend, Arc<dyn TranscriptionFactory>>,
    response: HashMap<ResponseBackend, Arc<dyn ResponseFactory>>,
    synthesis: HashMap<SynthesisBackend, Arc<dyn SynthesisFactory>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("transcription", &self.transcription.keys().collect::<Vec<_>>())
            .field("response", &self.response.keys().collect::<Vec<_>>())
            .field("synthesis", &self.synthesis.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the offline `Energy`, `Echo` and `Tone` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_transcription(
            TranscriptionBackend::Energy,
            Arc::new(
                |input: &InputAudioConfig| -> anyhow::Result<Box<dyn TranscriptionStage>> {
                    Ok(Box::new(EnergyTranscriber::new(input)))
                },
            ),
        );
        registry.register_response(
            ResponseBackend::Echo,
            Arc::new(
                |profile: &ConversationProfile| -> anyhow::Result<Box<dyn ResponseStage>> {
                    Ok(Box::new(EchoResponder::new(profile)))
                },
            ),
        );
        registry.register_synthesis(
            SynthesisBackend::Tone,
            Arc::new(
                |output: &OutputAudioConfig,
                 voice: &VoiceSelection,
                 options: SynthesisOptions|
                 -> anyhow::Result<Box<dyn SynthesisStage>> {
                    Ok(Box::new(ToneSynthesizer::new(output, voice, options)))
                },
            ),
        );
        registry
    }

    pub fn register_transcription(
        &mut self,
        backend: TranscriptionBackend,
        factory: Arc<dyn TranscriptionFactory>,
    ) -> &mut Self {
        self.transcription.insert(backend, factory);
        self
    }

    pub fn register_response(
        &mut self,
        backend: ResponseBackend,
        factory: Arc<dyn ResponseFactory>,
    ) -> &mut Self {
        self.response.insert(backend, factory);
        self
    }

    pub fn register_synthesis(
        &mut self,
        backend: SynthesisBackend,
        factory: Arc<dyn SynthesisFactory>,
    ) -> &mut Self {
        self.synthesis.insert(backend, factory);
        self
    }

    /// Constructs fresh stages for one session.
    pub fn build(
        &self,
        backends: &StageBackends,
        input: &InputAudioConfig,
        output: &OutputAudioConfig,
        profile: &ConversationProfile,
        options: SynthesisOptions,
    ) -> Result<PipelineStages, SessionError> {
        input.validate()?;
        output.validate()?;

        let transcription = self
            .transcription
            .get(&backends.transcription)
            .ok_or_else(|| unregistered("transcription", backends.transcription.as_str()))?
            .create(input)
            .map_err(|err| {
                construction_failed("transcription", backends.transcription.as_str(), err)
            })?;
        let response = self
            .response
            .get(&backends.response)
            .ok_or_else(|| unregistered("response", backends.response.as_str()))?
            .create(profile)
            .map_err(|err| construction_failed("response", backends.response.as_str(), err))?;
        let synthesis = self
            .synthesis
            .get(&backends.synthesis)
            .ok_or_else(|| unregistered("synthesis", backends.synthesis.as_str()))?
            .create(output, &profile.voice, options)
            .map_err(|err| construction_failed("synthesis", backends.synthesis.as_str(), err))?;

        info!(
            target: "stage_registry",
            transcription = backends.transcription.as_str(),
            response = backends.response.as_str(),
            synthesis = backends.synthesis.as_str(),
            encode_as_wav = options.encode_as_wav,
            "constructed pipeline stages"
        );

        Ok(PipelineStages {
            transcription,
            response,
            synthesis,
        })
    }
}

fn unregistered(kind: &str, backend: &str) -> SessionError {
    SessionError::configuration(format!("no {kind} backend registered for `{backend}`"))
}

fn construction_failed(kind: &str, backend: &str, err: anyhow::Error) -> SessionError {
    error!(
        target: "stage_registry",
        kind,
        backend,
        %err,
        "failed to construct stage"
    );
    SessionError::configuration(format!("failed to construct {kind} backend `{backend}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioEncoding;
    use anyhow::anyhow;

    fn input() -> InputAudioConfig {
        InputAudioConfig {
            sampling_rate: 16_000,
            audio_encoding: AudioEncoding::Linear16,
            chunk_size: 320,
            downsampling: None,
        }
    }

    fn output() -> OutputAudioConfig {
        OutputAudioConfig {
            sampling_rate: 24_000,
            audio_encoding: AudioEncoding::Linear16,
        }
    }

    #[test]
    fn builds_builtin_stages_by_default() {
        let registry = StageRegistry::with_builtin();
        let stages = registry.build(
            &StageBackends::default(),
            &input(),
            &output(),
            &ConversationProfile::default(),
            SynthesisOptions::default(),
        );
        assert!(stages.is_ok());
    }

    #[test]
    fn unregistered_backend_is_a_configuration_error() {
        let registry = StageRegistry::with_builtin();
        let backends = StageBackends {
            transcription: TranscriptionBackend::Deepgram,
            ..StageBackends::default()
        };
        let err = registry
            .build(
                &backends,
                &input(),
                &output(),
                &ConversationProfile::default(),
                SynthesisOptions::default(),
            )
            .expect_err("deepgram is not registered");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("deepgram"));
    }

    #[test]
    fn factory_failure_is_a_configuration_error() {
        let mut registry = StageRegistry::with_builtin();
        registry.register_synthesis(
            SynthesisBackend::Azure,
            Arc::new(
                |_: &OutputAudioConfig,
                 _: &VoiceSelection,
                 _: SynthesisOptions|
                 -> anyhow::Result<Box<dyn SynthesisStage>> {
                    Err(anyhow!("missing AZURE_SPEECH_KEY"))
                },
            ),
        );
        let backends = StageBackends {
            synthesis: SynthesisBackend::Azure,
            ..StageBackends::default()
        };
        let err = registry
            .build(
                &backends,
                &input(),
                &output(),
                &ConversationProfile::default(),
                SynthesisOptions::default(),
            )
            .expect_err("factory fails");
        assert!(err.to_string().contains("missing AZURE_SPEECH_KEY"));
    }

    #[test]
    fn invalid_audio_config_is_rejected_before_construction() {
        let registry = StageRegistry::with_builtin();
        let mut bad_input = input();
        bad_input.chunk_size = 0;
        let err = registry
            .build(
                &StageBackends::default(),
                &bad_input,
                &output(),
                &ConversationProfile::default(),
                SynthesisOptions::default(),
            )
            .expect_err("zero chunk size");
        assert!(err.is_configuration());
    }
}
