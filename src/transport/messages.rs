//! JSON control messages, tagged by `type`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::audio::{AudioChunk, InputAudioConfig, OutboundFrame, OutputAudioConfig};
use crate::events::{Speaker, TranscriptNotice};
use crate::session::profile::ConversationMetadata;

use super::{TransportError, WireMessage};

/// Start descriptor sent by the client before any audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    pub input_audio_config: InputAudioConfig,
    pub output_audio_config: OutputAudioConfig,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub subscribe_transcript: bool,
    #[serde(default)]
    pub conversation_data: ConversationMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "websocket_audio_config_start")]
    AudioConfigStart(StartMessage),
    #[serde(rename = "websocket_audio")]
    Audio { data: String },
    #[serde(rename = "websocket_stop")]
    Stop,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|err| TransportError::Malformed(err.to_string()))
    }

    pub fn audio(chunk: &[u8]) -> Self {
        InboundMessage::Audio {
            data: STANDARD.encode(chunk),
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|err| TransportError::Malformed(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "websocket_ready")]
    Ready,
    #[serde(rename = "websocket_audio")]
    Audio { data: String },
    #[serde(rename = "websocket_transcript")]
    Transcript {
        session_id: String,
        sender: Speaker,
        text: String,
        timestamp: u64,
    },
}

impl OutboundMessage {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|err| TransportError::Malformed(err.to_string()))
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|err| TransportError::Malformed(err.to_string()))
    }
}

impl From<TranscriptNotice> for OutboundMessage {
    fn from(notice: TranscriptNotice) -> Self {
        OutboundMessage::Transcript {
            session_id: notice.session_id,
            sender: notice.sender,
            text: notice.text,
            timestamp: notice.timestamp_ms,
        }
    }
}

pub fn decode_audio(data: &str) -> Result<AudioChunk, TransportError> {
    STANDARD
        .decode(data.trim())
        .map(Bytes::from)
        .map_err(|err| TransportError::Malformed(format!("invalid base64 audio: {err}")))
}

/// Frames one outbound unit. Audio goes out as a binary frame when the
/// transport allows it, otherwise as base64 inside JSON.
pub(crate) fn encode_frame(
    frame: OutboundFrame,
    binary: bool,
) -> Result<WireMessage, TransportError> {
    let message = match frame {
        OutboundFrame::Audio(chunk) if binary => return Ok(WireMessage::Binary(chunk)),
        OutboundFrame::Audio(chunk) => OutboundMessage::Audio {
            data: STANDARD.encode(&chunk),
        },
        OutboundFrame::Ready => OutboundMessage::Ready,
        OutboundFrame::Transcript(notice) => notice.into(),
    };
    message.encode().map(WireMessage::Text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioEncoding;
    use crate::session::profile::{ConversationProfile, VoiceSelection};
    use serde_json::json;

    #[test]
    fn parses_start_descriptor() {
        let text = json!({
            "type": "websocket_audio_config_start",
            "input_audio_config": {
                "sampling_rate": 16000,
                "audio_encoding": "pcm16",
                "chunk_size": 320
            },
            "output_audio_config": {"sampling_rate": 24000, "audio_encoding": "linear16"},
            "subscribe_transcript": true,
            "conversation_data": {"persona_name": "Nova"}
        })
        .to_string();

        let InboundMessage::AudioConfigStart(start) =
            InboundMessage::parse(&text).expect("parse start")
        else {
            panic!("expected start message");
        };
        assert_eq!(start.input_audio_config.audio_encoding, AudioEncoding::Linear16);
        assert_eq!(start.input_audio_config.downsampling, None);
        assert_eq!(start.output_audio_config.sampling_rate, 24_000);
        assert!(start.subscribe_transcript);
        assert_eq!(start.conversation_id, None);
        assert_eq!(start.conversation_data.persona_name.as_deref(), Some("Nova"));
    }

    #[test]
    fn legacy_persona_fields_reach_the_profile() {
        let text = json!({
            "type": "websocket_audio_config_start",
            "input_audio_config": {
                "sampling_rate": 8000,
                "audio_encoding": "mulaw",
                "chunk_size": 160
            },
            "output_audio_config": {"sampling_rate": 8000, "audio_encoding": "mulaw"},
            "subscribe_transcript": false,
            "conversation_data": {
                "user_id": 42,
                "user_first_name": "Sam",
                "deeva_profile_id": 9001,
                "deeva_name": "Luna",
                "deeva_relationship_type": "mentor",
                "deeva_interests": {"i1": {"interest": {"name": "astronomy"}}},
                "deeva_memories": {"a": {"memo": "likes tea"}},
                "deeva_voice_id": "en-US-JennyNeural"
            }
        })
        .to_string();

        let InboundMessage::AudioConfigStart(start) =
            InboundMessage::parse(&text).expect("parse legacy start")
        else {
            panic!("expected start message");
        };
        let profile = ConversationProfile::from_metadata(&start.conversation_data)
            .expect("valid profile");
        assert_eq!(profile.persona_name, "Luna");
        assert_eq!(profile.relationship, "mentor");
        assert_eq!(profile.persona_interests, vec!["astronomy"]);
        assert_eq!(profile.memory_digest, "likes tea");
        assert_eq!(
            profile.voice,
            VoiceSelection::Named("en-US-JennyNeural".into())
        );
        assert_eq!(profile.user_id.as_deref(), Some("42"));
        assert_eq!(profile.persona_profile_id.as_deref(), Some("9001"));
    }

    #[test]
    fn parses_stop_and_audio() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"websocket_stop"}"#).expect("parse stop"),
            InboundMessage::Stop
        );

        let audio = InboundMessage::audio(&[1, 2, 3]).encode().expect("encode");
        let InboundMessage::Audio { data } = InboundMessage::parse(&audio).expect("parse audio")
        else {
            panic!("expected audio message");
        };
        assert_eq!(decode_audio(&data).expect("decode"), Bytes::from_static(&[1, 2, 3]));
    }

    #[test]
    fn rejects_unknown_message_types_and_bad_base64() {
        assert!(InboundMessage::parse(r#"{"type":"websocket_ping"}"#).is_err());
        assert!(decode_audio("not base64!").is_err());
    }

    #[test]
    fn audio_frames_fall_back_to_base64_json() {
        let chunk = Bytes::from_static(&[0, 1, 2, 3]);
        assert_eq!(
            encode_frame(OutboundFrame::Audio(chunk.clone()), true).expect("binary"),
            WireMessage::Binary(chunk)
        );

        let WireMessage::Text(text) =
            encode_frame(OutboundFrame::Audio(Bytes::from_static(&[0, 1, 2, 3])), false)
                .expect("text")
        else {
            panic!("expected text frame");
        };
        assert_eq!(text, r#"{"type":"websocket_audio","data":"AAECAw=="}"#);
    }

    #[test]
    fn ready_and_transcript_frames_are_tagged() {
        let WireMessage::Text(ready) = encode_frame(OutboundFrame::Ready, true).expect("ready")
        else {
            panic!("expected text frame");
        };
        assert_eq!(ready, r#"{"type":"websocket_ready"}"#);

        let notice = TranscriptNotice {
            session_id: "s1".into(),
            sender: Speaker::Bot,
            text: "hi".into(),
            timestamp_ms: 7,
        };
        let WireMessage::Text(text) =
            encode_frame(OutboundFrame::Transcript(notice), true).expect("transcript")
        else {
            panic!("expected text frame");
        };
        assert_eq!(
            OutboundMessage::parse(&text).expect("parse"),
            OutboundMessage::Transcript {
                session_id: "s1".into(),
                sender: Speaker::Bot,
                text: "hi".into(),
                timestamp: 7,
            }
        );
    }
}
