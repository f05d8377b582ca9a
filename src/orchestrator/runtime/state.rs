use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-session counters shared between the session front door and the
/// pipeline workers.
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    received: AtomicU64,
    dropped_inactive: AtomicU64,
    dropped_backpressure: AtomicU64,
    stage_errors: AtomicU64,
    late_writes: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_inactive_drop(&self) -> u64 {
        self.dropped_inactive.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the running total of backpressure drops, this one included.
    pub(crate) fn record_backpressure_drop(&self) -> u64 {
        self.dropped_backpressure.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_stage_error(&self) {
        self.stage_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_late_write(&self) {
        self.late_writes.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self, audio_chunks_sent: u64) -> SessionStats {
        SessionStats {
            chunks_received: self.received.load(Ordering::SeqCst),
            chunks_dropped_inactive: self.dropped_inactive.load(Ordering::SeqCst),
            chunks_dropped_backpressure: self.dropped_backpressure.load(Ordering::SeqCst),
            stage_errors: self.stage_errors.load(Ordering::SeqCst),
            audio_chunks_sent,
            late_sink_writes: self.late_writes.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of a session's traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Inbound chunks accepted into the transcription queue.
    pub chunks_received: u64,
    /// Inbound chunks ignored because the session was not active.
    pub chunks_dropped_inactive: u64,
    /// Items dropped after waiting out the enqueue timeout on a full queue.
    pub chunks_dropped_backpressure: u64,
    pub stage_errors: u64,
    pub audio_chunks_sent: u64,
    /// Synthesized chunks that arrived after the sink was closed.
    pub late_sink_writes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let counters = SessionCounters::new();
        counters.record_received();
        counters.record_received();
        assert_eq!(counters.record_backpressure_drop(), 1);
        assert_eq!(counters.record_backpressure_drop(), 2);
        counters.record_stage_error();
        counters.record_late_write();
        counters.record_inactive_drop();

        let stats = counters.snapshot(7);
        assert_eq!(
            stats,
            SessionStats {
                chunks_received: 2,
                chunks_dropped_inactive: 1,
                chunks_dropped_backpressure: 2,
                stage_errors: 1,
                audio_chunks_sent: 7,
                late_sink_writes: 1,
            }
        );
    }
}
