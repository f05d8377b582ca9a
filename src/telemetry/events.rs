use serde::Serialize;
use tracing::{info, warn};

use crate::orchestrator::types::StageKind;
use crate::orchestrator::SessionStats;
use crate::session::lifecycle::EndReason;

pub(crate) const TARGET: &str = "telemetry::session";
pub(crate) const EVENT_BACKPRESSURE: &str = "backpressure_exceeded";
pub(crate) const EVENT_STAGE_FAILURE: &str = "stage_failure";
pub(crate) const EVENT_SESSION_ENDED: &str = "session_ended";

#[derive(Debug, Serialize)]
pub struct BackpressureEvent<'a> {
    pub session_id: &'a str,
    pub queue: StageKind,
    pub dropped_total: u64,
}

#[derive(Debug, Serialize)]
pub struct StageFailureEvent<'a> {
    pub session_id: &'a str,
    pub stage: StageKind,
    pub error: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SessionEndedEvent<'a> {
    pub session_id: &'a str,
    pub reason: &'a EndReason,
    pub uptime_ms: u64,
    pub stats: SessionStats,
}

pub fn record_backpressure_exceeded(session_id: &str, queue: StageKind, dropped_total: u64) {
    let event = BackpressureEvent {
        session_id,
        queue,
        dropped_total,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_BACKPRESSURE,
            session_id,
            queue = queue.as_str(),
            dropped_total,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_BACKPRESSURE,
            %err,
            "failed to encode backpressure event"
        ),
    }
}

pub fn record_stage_failure(session_id: &str, stage: StageKind, error: &str) {
    let event = StageFailureEvent {
        session_id,
        stage,
        error,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_STAGE_FAILURE,
            session_id,
            stage = stage.as_str(),
            error,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_STAGE_FAILURE,
            %err,
            "failed to encode stage failure event"
        ),
    }
}

pub fn record_session_ended(
    session_id: &str,
    reason: &EndReason,
    uptime_ms: u64,
    stats: SessionStats,
) {
    let event = SessionEndedEvent {
        session_id,
        reason,
        uptime_ms,
        stats,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_SESSION_ENDED,
            session_id,
            reason = reason.as_str(),
            uptime_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_SESSION_ENDED,
            %err,
            "failed to encode session ended event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn session_ended_payload_carries_reason_and_stats() {
        let reason = EndReason::Failed("worker panicked".into());
        let event = SessionEndedEvent {
            session_id: "s1",
            reason: &reason,
            uptime_ms: 1_500,
            stats: SessionStats {
                chunks_received: 3,
                ..SessionStats::default()
            },
        };

        let value: Value =
            serde_json::from_str(&serde_json::to_string(&event).expect("encode event"))
                .expect("decode event");
        assert_eq!(value["reason"], json!({"kind": "failed", "reason": "worker panicked"}));
        assert_eq!(value["stats"]["chunks_received"], json!(3));
    }

    #[test]
    fn backpressure_payload_names_the_queue() {
        let event = BackpressureEvent {
            session_id: "s1",
            queue: StageKind::Transcription,
            dropped_total: 4,
        };
        let encoded = serde_json::to_string(&event).expect("encode event");
        assert!(encoded.contains(r#""queue":"transcription""#));
    }
}
