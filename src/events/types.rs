use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::orchestrator::types::StageKind;
use crate::session::lifecycle::EndReason;

/// Closed set of event kinds a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Transcript,
    SessionStarted,
    SessionEnded,
    StageFailed,
    BackpressureExceeded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Transcript => "transcript",
            EventType::SessionStarted => "session_started",
            EventType::SessionEnded => "session_ended",
            EventType::StageFailed => "stage_failed",
            EventType::BackpressureExceeded => "backpressure_exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Human,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Transcript(TranscriptEvent),
    SessionStarted,
    SessionEnded {
        reason: EndReason,
    },
    StageFailed {
        stage: StageKind,
        message: String,
    },
    BackpressureExceeded {
        queue: StageKind,
        dropped_total: u64,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Transcript(_) => EventType::Transcript,
            EventPayload::SessionStarted => EventType::SessionStarted,
            EventPayload::SessionEnded { .. } => EventType::SessionEnded,
            EventPayload::StageFailed { .. } => EventType::StageFailed,
            EventPayload::BackpressureExceeded { .. } => EventType::BackpressureExceeded,
        }
    }
}

/// Immutable session event. The type is derived from the payload so the two
/// can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    session_id: String,
    payload: EventPayload,
    timestamp: SystemTime,
}

impl Event {
    pub fn new<S: Into<String>>(session_id: S, payload: EventPayload) -> Self {
        Self {
            session_id: session_id.into(),
            payload,
            timestamp: SystemTime::now(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis().min(u64::MAX as u128) as u64)
            .unwrap_or_default()
    }
}

/// Serialized transcript line forwarded to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptNotice {
    pub session_id: String,
    pub sender: Speaker,
    pub text: String,
    pub timestamp_ms: u64,
}

impl TranscriptNotice {
    pub fn from_event(event: &Event, transcript: &TranscriptEvent) -> Self {
        Self {
            session_id: event.session_id().to_string(),
            sender: transcript.speaker,
            text: transcript.text.clone(),
            timestamp_ms: event.timestamp_ms(),
        }
    }
}
