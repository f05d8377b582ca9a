//! 转写事件到输出管道的转发。
//!
//! 传输层积压时丢弃转写通知，音频顺序不受影响。

use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::audio::OutputSink;
use crate::error::SinkError;
use crate::events::{Event, EventHandler};

/// Forwards one session's transcript events to the client through its sink.
///
/// The bus is shared by every session, so events for other sessions are
/// ignored. `rebind` swaps the sink without touching the subscription.
pub struct TranscriptForwarder {
    session_id: String,
    sink: RwLock<OutputSink>,
}

impl TranscriptForwarder {
    pub fn new<S: Into<String>>(session_id: S, sink: OutputSink) -> Self {
        Self {
            session_id: session_id.into(),
            sink: RwLock::new(sink),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn rebind(&self, sink: OutputSink) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
        debug!(
            target: "conversation_session",
            session_id = %self.session_id,
            "transcript forwarder rebound to a new sink"
        );
    }

    fn current_sink(&self) -> OutputSink {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventHandler for TranscriptForwarder {
    fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        if event.session_id() != self.session_id {
            return Ok(());
        }

        match self.current_sink().consume_transcript(event) {
            Ok(()) => Ok(()),
            Err(SinkError::Closed) => {
                debug!(
                    target: "conversation_session",
                    session_id = %self.session_id,
                    "transcript arrived after sink close"
                );
                Ok(())
            }
            Err(SinkError::Full) => {
                warn!(
                    target: "conversation_session",
                    session_id = %self.session_id,
                    "transport backlogged; dropping transcript notice"
                );
                Ok(())
            }
        }
    }
}
