//! 阶段编排：能力接口、后端注册表与有界队列运行时。

mod constants;
mod engine;

pub mod builtin;
pub mod config;
pub(crate) mod runtime;
pub mod traits;
pub mod types;

pub use config::{
    ResponseBackend, SessionConfig, StageBackends, SynthesisBackend, TranscriptionBackend,
};
pub use engine::StageRegistry;
pub use runtime::SessionStats;
pub use traits::{
    PipelineStages, ResponseFactory, ResponseStage, SynthesisFactory, SynthesisOptions,
    SynthesisStage, TranscriptionFactory, TranscriptionStage,
};
pub use types::{ResponseChunk, StageKind, Transcription, Utterance};
