use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::util::duration_to_ms;

/// How the pipeline came to a stop during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownOutcome {
    Drained,
    Cancelled,
    Aborted,
}

impl ShutdownOutcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ShutdownOutcome::Drained => "drained",
            ShutdownOutcome::Cancelled => "cancelled",
            ShutdownOutcome::Aborted => "aborted",
        }
    }
}

/// Owning handle over a running pipeline. Dropping it cancels the workers.
pub(crate) struct PipelineHandle {
    session_id: String,
    cancel: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub(super) fn new(
        session_id: String,
        cancel: CancellationToken,
        monitor: JoinHandle<()>,
    ) -> Self {
        Self {
            session_id,
            cancel,
            monitor: Some(monitor),
        }
    }

    /// Waits up to `grace` for the workers to drain on their own, then
    /// signals cancellation and waits `hard_cancel` more before aborting.
    pub(crate) async fn shutdown(
        mut self,
        grace: Duration,
        hard_cancel: Duration,
    ) -> ShutdownOutcome {
        let Some(mut monitor) = self.monitor.take() else {
            return ShutdownOutcome::Drained;
        };

        if timeout(grace, &mut monitor).await.is_ok() {
            debug!(
                target: "pipeline_runtime",
                session_id = %self.session_id,
                "pipeline drained"
            );
            return ShutdownOutcome::Drained;
        }

        warn!(
            target: "pipeline_runtime",
            session_id = %self.session_id,
            grace_ms = duration_to_ms(grace),
            "grace period elapsed; cancelling pipeline workers"
        );
        self.cancel.cancel();

        if timeout(hard_cancel, &mut monitor).await.is_ok() {
            return ShutdownOutcome::Cancelled;
        }

        warn!(
            target: "pipeline_runtime",
            session_id = %self.session_id,
            hard_cancel_ms = duration_to_ms(hard_cancel),
            "pipeline workers ignored cancellation; aborting"
        );
        monitor.abort();
        ShutdownOutcome::Aborted
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}
