//! Offline stage implementations used when no external engine is registered.

use std::f32::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::codec::{decode_samples, encode_samples, rms, wrap_wav};
use crate::audio::{AudioChunk, AudioEncoding, InputAudioConfig, OutputAudioConfig};
use crate::error::StageError;
use crate::orchestrator::constants::{
    ENDPOINT_SILENT_CHUNKS, SPEECH_RMS_THRESHOLD, SYNTH_CHUNK_DURATION, SYNTH_TONE_AMPLITUDE,
    SYNTH_TONE_HZ, SYNTH_WORD_DURATION,
};
use crate::orchestrator::traits::{
    ResponseStage, SynthesisOptions, SynthesisStage, TranscriptionStage,
};
use crate::orchestrator::types::{ResponseChunk, Transcription, Utterance};
use crate::session::profile::{ConversationProfile, VoiceSelection};

type TranscriptionItem = Result<Transcription, StageError>;

/// Energy based endpointer. Reports how much speech it heard once a run of
/// silent chunks follows speech; it does not recognize words.
pub struct EnergyTranscriber {
    encoding: AudioEncoding,
    sampling_rate: u32,
    downsampling: usize,
    tx: Option<mpsc::UnboundedSender<TranscriptionItem>>,
    rx: Option<mpsc::UnboundedReceiver<TranscriptionItem>>,
    in_speech: bool,
    speech_samples: usize,
    silent_chunks: usize,
    utterances: u64,
}

impl EnergyTranscriber {
    pub fn new(input: &InputAudioConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            encoding: input.audio_encoding,
            sampling_rate: input.effective_sampling_rate().max(1),
            downsampling: input.downsampling.unwrap_or(1).max(1) as usize,
            tx: Some(tx),
            rx: Some(rx),
            in_speech: false,
            speech_samples: 0,
            silent_chunks: 0,
            utterances: 0,
        }
    }

    fn emit(&mut self, item: Transcription) {
        if let Some(tx) = &self.tx {
            // Receiver gone means the session stopped listening.
            let _ = tx.send(Ok(item));
        }
    }

    fn end_utterance(&mut self) {
        self.utterances += 1;
        let seconds = self.speech_samples as f32 / self.sampling_rate as f32;
        let text = format!("utterance {} ({seconds:.2}s of speech)", self.utterances);
        self.in_speech = false;
        self.speech_samples = 0;
        self.silent_chunks = 0;
        self.emit(Transcription::final_text(text));
    }
}

#[async_trait]
impl TranscriptionStage for EnergyTranscriber {
    fn transcriptions(&mut self) -> BoxStream<'static, TranscriptionItem> {
        match self.rx.take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => {
                warn!(
                    target: "builtin_stages",
                    "transcription stream already taken for this session"
                );
                stream::empty().boxed()
            }
        }
    }

    async fn feed(&mut self, chunk: AudioChunk) -> Result<(), StageError> {
        if self.tx.is_none() {
            return Err(StageError::Closed);
        }
        if chunk.is_empty() {
            return Err(StageError::malformed("empty audio chunk"));
        }

        let samples = decode_samples(&chunk, self.encoding).ok_or_else(|| {
            StageError::malformed(format!(
                "{} byte chunk is not whole {} samples",
                chunk.len(),
                self.encoding.as_str()
            ))
        })?;
        let samples: Vec<f32> = samples.into_iter().step_by(self.downsampling).collect();
        let level = rms(&samples);

        if level >= SPEECH_RMS_THRESHOLD {
            if !self.in_speech {
                self.in_speech = true;
                self.emit(Transcription::interim("..."));
            }
            self.speech_samples += samples.len();
            self.silent_chunks = 0;
        } else if self.in_speech {
            self.silent_chunks += 1;
            if self.silent_chunks >= ENDPOINT_SILENT_CHUNKS {
                self.end_utterance();
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), StageError> {
        if self.in_speech {
            self.end_utterance();
        }
        self.tx = None;
        Ok(())
    }
}

/// Replies by reflecting the utterance back, one sentence per chunk.
pub struct EchoResponder {
    persona_name: String,
    user_name: String,
}

impl EchoResponder {
    pub fn new(profile: &ConversationProfile) -> Self {
        debug!(
            target: "builtin_stages",
            prompt_chars = profile.prompt().chars().count(),
            "echo responder ignores the persona prompt"
        );
        Self {
            persona_name: profile.persona_name.clone(),
            user_name: profile.user_first_name.clone(),
        }
    }

    fn sentences(&self, heard: &str) -> Vec<String> {
        vec![
            format!("This is {}.", self.persona_name),
            format!("I heard {heard}."),
            format!("Tell me more, {}.", self.user_name),
        ]
    }
}

impl ResponseStage for EchoResponder {
    fn respond<'a>(
        &'a mut self,
        utterance: &'a Utterance,
    ) -> BoxStream<'a, Result<String, StageError>> {
        let heard = utterance
            .text
            .trim()
            .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?'));
        if heard.is_empty() {
            return stream::once(async {
                Err::<String, StageError>(StageError::malformed("empty utterance"))
            })
            .boxed();
        }
        stream::iter(self.sentences(heard).into_iter().map(Ok)).boxed()
    }
}

/// Renders one tone burst per word. Stands in for a real voice.
pub struct ToneSynthesizer {
    output: OutputAudioConfig,
    options: SynthesisOptions,
    base_hz: f32,
}

impl ToneSynthesizer {
    pub fn new(
        output: &OutputAudioConfig,
        voice: &VoiceSelection,
        options: SynthesisOptions,
    ) -> Self {
        let offset = voice
            .id()
            .map(|id| id.bytes().map(u32::from).sum::<u32>() % 80)
            .unwrap_or(0);
        Self {
            output: output.clone(),
            options,
            base_hz: SYNTH_TONE_HZ + offset as f32,
        }
    }

    fn samples_for(&self, duration: Duration) -> usize {
        (self.output.sampling_rate as f64 * duration.as_secs_f64()).round() as usize
    }

    fn render(&self, text: &str) -> Vec<f32> {
        let word_len = self.samples_for(SYNTH_WORD_DURATION);
        let gap_len = word_len / 3;
        let rate = self.output.sampling_rate as f32;
        let mut samples = Vec::new();

        for word in text.split_whitespace() {
            let hz = self.base_hz + (word.chars().count() % 6) as f32 * 20.0;
            samples.extend((0..word_len).map(|n| {
                let envelope = (n as f32 / word_len as f32 * std::f32::consts::PI).sin();
                SYNTH_TONE_AMPLITUDE * envelope * (TAU * hz * n as f32 / rate).sin()
            }));
            samples.extend(std::iter::repeat(0.0).take(gap_len));
        }
        samples
    }

    fn package(&self, samples: &[f32]) -> AudioChunk {
        let encoded = encode_samples(samples, self.output.audio_encoding);
        if self.options.encode_as_wav {
            wrap_wav(
                &encoded,
                self.output.sampling_rate,
                self.output.audio_encoding,
            )
        } else {
            encoded
        }
    }
}

impl SynthesisStage for ToneSynthesizer {
    fn synthesize<'a>(
        &'a mut self,
        chunk: &'a ResponseChunk,
    ) -> BoxStream<'a, Result<AudioChunk, StageError>> {
        let samples = self.render(&chunk.text);
        let chunk_len = self.samples_for(SYNTH_CHUNK_DURATION).max(1);
        let frames: Vec<AudioChunk> = samples
            .chunks(chunk_len)
            .map(|frame| self.package(frame))
            .collect();
        stream::iter(frames.into_iter().map(Ok)).boxed()
    }
}
