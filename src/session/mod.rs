//! 会话编排状态机。
//!
//! [`ConversationSession`] 持有单次对话的处理阶段与输出管道，
//! 在活跃期间驱动流水线，并通过共享的 [`EventBus`] 广播生命周期与转写事件。

pub mod lifecycle;
pub mod profile;
pub mod transcript;

pub use lifecycle::{EndReason, SessionState};
pub use profile::{ConversationMetadata, ConversationProfile, VoiceSelection};
pub use transcript::TranscriptForwarder;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace};

use crate::audio::{AudioChunk, InputAudioConfig, OutputAudioConfig, OutputSink};
use crate::error::SessionError;
use crate::events::{EventBus, EventHandler, EventPayload, EventType, SubscriptionId};
use crate::orchestrator::runtime::util::duration_to_ms;
use crate::orchestrator::runtime::{
    spawn_pipeline, Enqueued, PipelineContext, PipelineHandle, SessionCounters, ShutdownOutcome,
};
use crate::orchestrator::{PipelineStages, SessionConfig, SessionStats, StageKind};
use crate::telemetry::events::record_session_ended;

/// Everything needed to assemble a session.
pub struct SessionParts {
    pub session_id: String,
    pub input: InputAudioConfig,
    pub sink: OutputSink,
    pub stages: PipelineStages,
    pub bus: EventBus,
    /// Registered for `Transcript` events for the lifetime of the session.
    pub transcript_subscriber: Option<Arc<dyn EventHandler>>,
    pub profile: ConversationProfile,
    pub config: SessionConfig,
}

enum Pipeline {
    Idle(PipelineStages),
    Running {
        audio_tx: mpsc::Sender<AudioChunk>,
        handle: PipelineHandle,
    },
    Stopped,
}

struct SessionInner {
    id: String,
    input: InputAudioConfig,
    profile: ConversationProfile,
    config: SessionConfig,
    sink: OutputSink,
    bus: EventBus,
    ctx: PipelineContext,
    state: watch::Sender<SessionState>,
    pipeline: Mutex<Pipeline>,
    subscription: Mutex<Option<SubscriptionId>>,
    started_at: Mutex<Option<Instant>>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn lock_pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `from -> to` atomically; on refusal returns the observed state.
    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        let mut observed = from;
        let changed = self.state.send_if_modified(|state| {
            observed = *state;
            if *state == from && from.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            Ok(())
        } else {
            Err(observed)
        }
    }

    fn unsubscribe_transcripts(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            self.bus.unsubscribe(id);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.unsubscribe_transcripts();
    }
}

/// Handle onto one conversation session. Clones share the same session.
#[derive(Clone)]
pub struct ConversationSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConversationSession {
    /// Validates the configuration and wires the session together. Nothing
    /// runs until [`start`](Self::start).
    pub fn create(parts: SessionParts) -> Result<Self, SessionError> {
        let SessionParts {
            session_id,
            input,
            sink,
            stages,
            bus,
            transcript_subscriber,
            profile,
            config,
        } = parts;

        let session_id = session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(SessionError::configuration("session id must not be empty"));
        }
        input.validate()?;
        sink.output_config().validate()?;
        config.validate()?;
        if sink.is_closed() {
            return Err(SessionError::configuration("output sink is already closed"));
        }

        let ctx = PipelineContext::new(
            &session_id,
            bus.clone(),
            sink.clone(),
            Arc::new(SessionCounters::new()),
            config.enqueue_timeout,
        );
        let subscription =
            transcript_subscriber.map(|handler| bus.subscribe(EventType::Transcript, handler));
        let (state, _) = watch::channel(SessionState::Created);

        info!(
            target: "conversation_session",
            session_id = %session_id,
            input_rate = input.sampling_rate,
            input_encoding = input.audio_encoding.as_str(),
            output_rate = sink.output_config().sampling_rate,
            output_encoding = sink.output_config().audio_encoding.as_str(),
            transcript_subscriber = subscription.is_some(),
            "session created"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                id: session_id,
                input,
                profile,
                config,
                sink,
                bus,
                ctx,
                state,
                pipeline: Mutex::new(Pipeline::Idle(stages)),
                subscription: Mutex::new(subscription),
                started_at: Mutex::new(None),
            }),
        })
    }

    /// Starts the pipeline workers and invokes `on_ready` once they are in
    /// place. Fails if the session was already started or terminated.
    pub fn start<F>(&self, on_ready: F) -> Result<(), SessionError>
    where
        F: FnOnce(),
    {
        let fault_rx = {
            let mut pipeline = self.inner.lock_pipeline();
            let stages = match std::mem::replace(&mut *pipeline, Pipeline::Stopped) {
                Pipeline::Idle(stages) => stages,
                other => {
                    *pipeline = other;
                    return Err(self.lifecycle_error("start"));
                }
            };

            if let Err(state) = self
                .inner
                .transition(SessionState::Created, SessionState::Active)
            {
                *pipeline = Pipeline::Idle(stages);
                return Err(SessionError::Lifecycle {
                    operation: "start",
                    state,
                });
            }

            let (handle, audio_tx, fault_rx) = spawn_pipeline(
                self.inner.ctx.clone(),
                stages,
                self.inner.config.queue_capacity,
            );
            *pipeline = Pipeline::Running { audio_tx, handle };
            fault_rx
        };

        *self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.spawn_supervisor(fault_rx);
        self.inner.ctx.publish(EventPayload::SessionStarted);

        info!(
            target: "conversation_session",
            session_id = %self.inner.id,
            queue_capacity = self.inner.config.queue_capacity,
            "session started"
        );
        on_ready();
        Ok(())
    }

    /// Queues an inbound chunk for transcription. Chunks arriving while the
    /// session is not active are dropped and counted. A full queue suspends
    /// the caller for at most the configured enqueue timeout.
    pub async fn receive_audio(&self, chunk: AudioChunk) {
        let audio_tx = if self.is_active() {
            match &*self.inner.lock_pipeline() {
                Pipeline::Running { audio_tx, .. } => Some(audio_tx.clone()),
                _ => None,
            }
        } else {
            None
        };

        let Some(audio_tx) = audio_tx else {
            let dropped = self.inner.ctx.counters().record_inactive_drop();
            trace!(
                target: "conversation_session",
                session_id = %self.inner.id,
                state = self.state().as_str(),
                dropped,
                "ignoring audio for inactive session"
            );
            return;
        };

        match self
            .inner
            .ctx
            .enqueue(&audio_tx, StageKind::Transcription, chunk)
            .await
        {
            Enqueued::Sent => self.inner.ctx.counters().record_received(),
            Enqueued::Dropped => {}
            Enqueued::Closed | Enqueued::Cancelled => {
                self.inner.ctx.counters().record_inactive_drop();
                debug!(
                    target: "conversation_session",
                    session_id = %self.inner.id,
                    "transcription queue closed; dropping audio"
                );
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Resolves once the session has left `Active` for good, whether it was
    /// terminated by a caller or by a pipeline fault.
    pub async fn stopped(&self) {
        let mut state_rx = self.inner.state.subscribe();
        let _ = state_rx
            .wait_for(|state| {
                matches!(state, SessionState::Terminating | SessionState::Terminated)
            })
            .await;
    }

    /// Stops the session: drains in-flight work for the grace period, then
    /// cancels what is left, closes the sink and publishes `SessionEnded`.
    /// Calling it again, or concurrently, waits for the first call to finish.
    pub async fn terminate(&self) {
        self.terminate_with(EndReason::Completed).await;
    }

    async fn terminate_with(&self, reason: EndReason) {
        let mut previous = SessionState::Terminated;
        self.inner.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                SessionState::Created => {
                    *state = SessionState::Terminated;
                    true
                }
                SessionState::Active => {
                    *state = SessionState::Terminating;
                    true
                }
                SessionState::Terminating | SessionState::Terminated => false,
            }
        });

        match previous {
            SessionState::Created => {
                let stages =
                    std::mem::replace(&mut *self.inner.lock_pipeline(), Pipeline::Stopped);
                drop(stages);
                self.finish(EndReason::Aborted, None);
            }
            SessionState::Active => {
                info!(
                    target: "conversation_session",
                    session_id = %self.inner.id,
                    reason = reason.as_str(),
                    "terminating session"
                );
                let running =
                    std::mem::replace(&mut *self.inner.lock_pipeline(), Pipeline::Stopped);
                let outcome = match running {
                    Pipeline::Running { audio_tx, handle } => {
                        // Closing the inbound queue lets the workers drain in order.
                        drop(audio_tx);
                        Some(
                            handle
                                .shutdown(
                                    self.inner.config.grace_period,
                                    self.inner.config.hard_cancel_timeout,
                                )
                                .await,
                        )
                    }
                    Pipeline::Idle(_) | Pipeline::Stopped => None,
                };
                self.finish(reason, outcome);
                self.inner.state.send_replace(SessionState::Terminated);
            }
            SessionState::Terminating | SessionState::Terminated => {
                let mut state_rx = self.inner.state.subscribe();
                let _ = state_rx
                    .wait_for(|state| *state == SessionState::Terminated)
                    .await;
            }
        }
    }

    fn finish(&self, reason: EndReason, outcome: Option<ShutdownOutcome>) {
        self.inner.sink.close();
        self.inner.unsubscribe_transcripts();

        let stats = self.stats();
        let uptime_ms = self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|started_at| duration_to_ms(started_at.elapsed()))
            .unwrap_or_default();
        record_session_ended(&self.inner.id, &reason, uptime_ms, stats);

        info!(
            target: "conversation_session",
            session_id = %self.inner.id,
            reason = reason.as_str(),
            shutdown = outcome.map_or("not_started", |outcome| outcome.as_str()),
            uptime_ms,
            "session terminated"
        );
        self.inner
            .ctx
            .publish(EventPayload::SessionEnded { reason });
    }

    /// Terminates the session with a failure reason if a worker panics.
    fn spawn_supervisor(&self, fault_rx: oneshot::Receiver<String>) {
        let session = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let Ok(reason) = fault_rx.await else {
                return;
            };
            let Some(inner) = session.upgrade() else {
                return;
            };
            error!(
                target: "conversation_session",
                session_id = %inner.id,
                %reason,
                "pipeline fault; terminating session"
            );
            ConversationSession { inner }
                .terminate_with(EndReason::Failed(reason))
                .await;
        });
    }

    fn lifecycle_error(&self, operation: &'static str) -> SessionError {
        SessionError::Lifecycle {
            operation,
            state: self.state(),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn profile(&self) -> &ConversationProfile {
        &self.inner.profile
    }

    pub fn input_config(&self) -> &InputAudioConfig {
        &self.inner.input
    }

    pub fn output_config(&self) -> &OutputAudioConfig {
        self.inner.sink.output_config()
    }

    pub fn sink(&self) -> &OutputSink {
        &self.inner.sink
    }

    pub fn stats(&self) -> SessionStats {
        self.inner
            .ctx
            .counters()
            .snapshot(self.inner.sink.audio_frames_sent())
    }
}
