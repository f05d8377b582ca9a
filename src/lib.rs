//! Parley Core
//!
//! Real-time duplex voice conversation sessions: inbound audio is
//! transcribed, answered and synthesized back to the client through a
//! bounded pipeline, while session events are published on a shared bus.

pub mod audio;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use audio::{AudioChunk, AudioEncoding, InputAudioConfig, OutputAudioConfig, OutputSink};
pub use error::{SessionError, SinkError, StageError};
pub use events::{Event, EventBus, EventHandler, EventPayload, EventType};
pub use orchestrator::{SessionConfig, SessionStats, StageBackends, StageRegistry};
pub use session::{ConversationSession, EndReason, SessionParts, SessionState};
pub use transport::ConversationRouter;
