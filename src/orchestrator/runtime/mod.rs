//! Bounded-queue pipeline that drives transcription, response and synthesis
//! workers for one session.

mod handle;
mod state;
pub(crate) mod util;
mod worker;

pub(crate) use handle::{PipelineHandle, ShutdownOutcome};
pub(crate) use state::SessionCounters;
pub use state::SessionStats;
pub(crate) use worker::{Enqueued, PipelineContext};

use std::any::Any;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::audio::AudioChunk;
use crate::orchestrator::traits::PipelineStages;

/// Spawns one worker per stage, linked by bounded queues of
/// `queue_capacity`, plus a monitor that joins them.
///
/// Returns the handle, the sender for inbound audio and a receiver that
/// resolves with a reason if any worker panics.
pub(crate) fn spawn_pipeline(
    ctx: PipelineContext,
    stages: PipelineStages,
    queue_capacity: usize,
) -> (PipelineHandle, mpsc::Sender<AudioChunk>, oneshot::Receiver<String>) {
    let (audio_tx, audio_rx) = mpsc::channel(queue_capacity);
    let (utterance_tx, utterance_rx) = mpsc::channel(queue_capacity);
    let (chunk_tx, chunk_rx) = mpsc::channel(queue_capacity);
    let PipelineStages {
        transcription,
        response,
        synthesis,
    } = stages;

    let mut workers = JoinSet::new();
    workers.spawn(worker::run_transcription(
        ctx.clone(),
        transcription,
        audio_rx,
        utterance_tx,
    ));
    workers.spawn(worker::run_response(
        ctx.clone(),
        response,
        utterance_rx,
        chunk_tx,
    ));
    workers.spawn(worker::run_synthesis(ctx.clone(), synthesis, chunk_rx));

    let (fault_tx, fault_rx) = oneshot::channel();
    let session_id = ctx.session_id().to_string();
    let monitor_session = session_id.clone();

    let monitor = tokio::spawn(async move {
        let mut fault_tx = Some(fault_tx);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(()) => {}
                Err(err) if err.is_panic() => {
                    let reason = panic_reason(err.into_panic());
                    error!(
                        target: "pipeline_runtime",
                        session_id = %monitor_session,
                        %reason,
                        "pipeline worker panicked"
                    );
                    if let Some(tx) = fault_tx.take() {
                        let _ = tx.send(reason);
                    }
                }
                Err(err) => debug!(
                    target: "pipeline_runtime",
                    session_id = %monitor_session,
                    %err,
                    "pipeline worker stopped"
                ),
            }
        }
        debug!(
            target: "pipeline_runtime",
            session_id = %monitor_session,
            "all pipeline workers finished"
        );
    });

    let handle = PipelineHandle::new(session_id, ctx.cancel_token(), monitor);
    (handle, audio_tx, fault_rx)
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_reason_reads_string_payloads() {
        assert_eq!(
            panic_reason(Box::new("stage exploded")),
            "worker panicked: stage exploded"
        );
        assert_eq!(
            panic_reason(Box::new(String::from("bad state"))),
            "worker panicked: bad state"
        );
        assert_eq!(panic_reason(Box::new(42_u8)), "worker panicked");
    }
}
