use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::audio::{AudioChunk, OutputSink};
use crate::error::{SinkError, StageError};
use crate::events::{Event, EventBus, EventPayload, Speaker, TranscriptEvent};
use crate::orchestrator::traits::{ResponseStage, SynthesisStage, TranscriptionStage};
use crate::orchestrator::types::{ResponseChunk, StageKind, Utterance};
use crate::telemetry::events::{record_backpressure_exceeded, record_stage_failure};

use super::state::SessionCounters;

/// Outcome of pushing one item onto a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Sent,
    /// The queue stayed full for the whole enqueue timeout.
    Dropped,
    /// The consumer is gone.
    Closed,
    Cancelled,
}

/// Everything a worker needs besides its own stage and queues.
#[derive(Clone)]
pub(crate) struct PipelineContext {
    session_id: Arc<str>,
    bus: EventBus,
    sink: OutputSink,
    counters: Arc<SessionCounters>,
    cancel: CancellationToken,
    enqueue_timeout: Duration,
}

impl PipelineContext {
    pub(crate) fn new(
        session_id: &str,
        bus: EventBus,
        sink: OutputSink,
        counters: Arc<SessionCounters>,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            session_id: Arc::from(session_id),
            bus,
            sink,
            counters,
            cancel: CancellationToken::new(),
            enqueue_timeout,
        }
    }

    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub(crate) fn publish(&self, payload: EventPayload) -> usize {
        self.bus.publish(Event::new(&*self.session_id, payload))
    }

    pub(crate) fn report_stage_failure(&self, stage: StageKind, err: &StageError) {
        self.counters.record_stage_error();
        let message = err.to_string();
        record_stage_failure(&self.session_id, stage, &message);
        self.publish(EventPayload::StageFailed { stage, message });
    }

    pub(crate) fn report_backpressure(&self, queue: StageKind) {
        let dropped_total = self.counters.record_backpressure_drop();
        record_backpressure_exceeded(&self.session_id, queue, dropped_total);
        self.publish(EventPayload::BackpressureExceeded {
            queue,
            dropped_total,
        });
    }

    /// Suspends on a full queue for at most the enqueue timeout, then drops
    /// `item` and records a backpressure diagnostic. The newest item is the
    /// one dropped; the queued backlog keeps its order.
    pub(crate) async fn enqueue<T: Send>(
        &self,
        tx: &mpsc::Sender<T>,
        queue: StageKind,
        item: T,
    ) -> Enqueued {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Enqueued::Cancelled,

            result = tx.send_timeout(item, self.enqueue_timeout) => match result {
                Ok(()) => Enqueued::Sent,
                Err(SendTimeoutError::Timeout(_)) => {
                    self.report_backpressure(queue);
                    Enqueued::Dropped
                }
                Err(SendTimeoutError::Closed(_)) => Enqueued::Closed,
            },
        }
    }

    /// Returns `true` when the chunk reached the sink. A sink that stays full
    /// for the enqueue timeout drops the chunk like any other queue.
    async fn deliver_audio(&self, chunk: AudioChunk) -> bool {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            sent = self.sink.send_timeout(chunk, self.enqueue_timeout) => sent,
        };
        match sent {
            Ok(()) => true,
            Err(SinkError::Full) => {
                self.report_backpressure(StageKind::Output);
                false
            }
            Err(SinkError::Closed) => {
                self.counters.record_late_write();
                debug!(
                    target: "pipeline_runtime",
                    session_id = %self.session_id,
                    "dropping synthesized audio after sink close"
                );
                false
            }
        }
    }
}

pub(crate) async fn run_transcription(
    ctx: PipelineContext,
    mut stage: Box<dyn TranscriptionStage>,
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    utterance_tx: mpsc::Sender<Utterance>,
) {
    let mut transcriptions = stage.transcriptions();
    let mut input_open = true;

    loop {
        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => {
                debug!(
                    target: "pipeline_runtime",
                    session_id = ctx.session_id(),
                    "transcription worker cancelled"
                );
                break;
            }

            maybe_transcription = transcriptions.next() => {
                let transcription = match maybe_transcription {
                    Some(Ok(transcription)) => transcription,
                    Some(Err(err)) => {
                        ctx.report_stage_failure(StageKind::Transcription, &err);
                        continue;
                    }
                    None => break,
                };

                if transcription.text.trim().is_empty() {
                    continue;
                }
                if !transcription.is_final {
                    trace!(
                        target: "pipeline_runtime",
                        session_id = ctx.session_id(),
                        text = %transcription.text,
                        "interim transcription"
                    );
                    continue;
                }

                ctx.publish(EventPayload::Transcript(TranscriptEvent {
                    speaker: Speaker::Human,
                    text: transcription.text.clone(),
                }));

                let utterance = Utterance::new(ctx.session_id(), transcription);
                match ctx.enqueue(&utterance_tx, StageKind::Response, utterance).await {
                    Enqueued::Sent | Enqueued::Dropped => {}
                    Enqueued::Closed | Enqueued::Cancelled => break,
                }
            }

            maybe_chunk = audio_rx.recv(), if input_open => {
                match maybe_chunk {
                    Some(chunk) => {
                        let fed = tokio::select! {
                            biased;
                            _ = ctx.cancel.cancelled() => break,
                            fed = stage.feed(chunk) => fed,
                        };
                        if let Err(err) = fed {
                            ctx.report_stage_failure(StageKind::Transcription, &err);
                        }
                    }
                    None => {
                        input_open = false;
                        if let Err(err) = stage.finish().await {
                            ctx.report_stage_failure(StageKind::Transcription, &err);
                        }
                    }
                }
            }
        }
    }
}

pub(crate) async fn run_response(
    ctx: PipelineContext,
    mut stage: Box<dyn ResponseStage>,
    mut utterance_rx: mpsc::Receiver<Utterance>,
    chunk_tx: mpsc::Sender<ResponseChunk>,
) {
    let mut utterance_seq: u64 = 0;

    loop {
        let utterance = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = utterance_rx.recv() => match next {
                Some(utterance) => utterance,
                None => break,
            },
        };
        if !utterance.is_final {
            continue;
        }
        utterance_seq += 1;

        let mut replies = stage.respond(&utterance);
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return,
                next = replies.next() => next,
            };

            match next {
                Some(Ok(text)) if text.trim().is_empty() => {}
                Some(Ok(text)) => {
                    let chunk = ResponseChunk {
                        session_id: utterance.session_id.clone(),
                        text,
                        utterance_seq,
                    };
                    match ctx.enqueue(&chunk_tx, StageKind::Synthesis, chunk).await {
                        Enqueued::Sent | Enqueued::Dropped => {}
                        Enqueued::Closed | Enqueued::Cancelled => return,
                    }
                }
                Some(Err(err)) => ctx.report_stage_failure(StageKind::Response, &err),
                None => break,
            }
        }
    }
}

pub(crate) async fn run_synthesis(
    ctx: PipelineContext,
    mut stage: Box<dyn SynthesisStage>,
    mut chunk_rx: mpsc::Receiver<ResponseChunk>,
) {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = chunk_rx.recv() => match next {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let mut delivered = 0_usize;
        {
            let mut audio = stage.synthesize(&chunk);
            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return,
                    next = audio.next() => next,
                };

                match next {
                    Some(Ok(frame)) => {
                        if ctx.deliver_audio(frame).await {
                            delivered += 1;
                        }
                    }
                    Some(Err(err)) => ctx.report_stage_failure(StageKind::Synthesis, &err),
                    None => break,
                }
            }
        }

        if delivered == 0 {
            warn!(
                target: "pipeline_runtime",
                session_id = ctx.session_id(),
                utterance_seq = chunk.utterance_seq,
                "response chunk produced no audio"
            );
            continue;
        }

        ctx.publish(EventPayload::Transcript(TranscriptEvent {
            speaker: Speaker::Bot,
            text: chunk.text,
        }));
    }
}
