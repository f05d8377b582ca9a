//! Conversation metadata supplied at connect time and the validated profile
//! that seeds the response stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SessionError;

pub const DEFAULT_PERSONA_NAME: &str = "Assistant";
pub const DEFAULT_RELATIONSHIP: &str = "companion";
pub const DEFAULT_USER_NAME: &str = "friend";
const MAX_NAME_CHARS: usize = 64;
const MAX_IDENTIFIER_CHARS: usize = 128;
const MAX_MEMORY_DIGEST_CHARS: usize = 4_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntry {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaInterestEntry {
    #[serde(default)]
    pub interest: NamedEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    #[serde(default)]
    pub memo: Option<String>,
}

/// Free-form conversation metadata as sent by the client. Collections are
/// keyed maps; iteration follows key order.
///
/// Persona fields also accept their `deeva_*` wire names, and ids may be
/// sent as strings or numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationMetadata {
    #[serde(deserialize_with = "loose_id")]
    pub user_id: Option<String>,
    pub user_first_name: Option<String>,
    pub user_last_name: Option<String>,
    pub user_interests: BTreeMap<String, NamedEntry>,
    #[serde(alias = "deeva_profile_id", deserialize_with = "loose_id")]
    pub persona_profile_id: Option<String>,
    #[serde(alias = "deeva_name")]
    pub persona_name: Option<String>,
    #[serde(alias = "deeva_relationship_type")]
    pub persona_relationship: Option<String>,
    #[serde(alias = "deeva_interests")]
    pub persona_interests: BTreeMap<String, PersonaInterestEntry>,
    #[serde(alias = "deeva_memories")]
    pub persona_memories: BTreeMap<String, MemoryEntry>,
    #[serde(alias = "deeva_voice_id")]
    pub persona_voice_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseId {
    Text(String),
    Number(serde_json::Number),
}

fn loose_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<LooseId>::deserialize(deserializer)?.map(|id| match id {
        LooseId::Text(text) => text,
        LooseId::Number(number) => number.to_string(),
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum VoiceSelection {
    #[default]
    Default,
    Named(String),
}

impl VoiceSelection {
    pub fn id(&self) -> Option<&str> {
        match self {
            VoiceSelection::Default => None,
            VoiceSelection::Named(id) => Some(id),
        }
    }
}

/// Immutable persona configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationProfile {
    pub user_id: Option<String>,
    pub user_first_name: String,
    pub user_last_name: Option<String>,
    pub user_interests: Vec<String>,
    pub persona_profile_id: Option<String>,
    pub persona_name: String,
    pub relationship: String,
    pub persona_interests: Vec<String>,
    pub memory_digest: String,
    pub voice: VoiceSelection,
}

impl Default for ConversationProfile {
    fn default() -> Self {
        Self {
            user_id: None,
            user_first_name: DEFAULT_USER_NAME.to_string(),
            user_last_name: None,
            user_interests: Vec::new(),
            persona_profile_id: None,
            persona_name: DEFAULT_PERSONA_NAME.to_string(),
            relationship: DEFAULT_RELATIONSHIP.to_string(),
            persona_interests: Vec::new(),
            memory_digest: String::new(),
            voice: VoiceSelection::Default,
        }
    }
}

impl ConversationProfile {
    pub fn from_metadata(metadata: &ConversationMetadata) -> Result<Self, SessionError> {
        let user_interests = metadata
            .user_interests
            .values()
            .filter_map(|entry| clean(entry.name.as_deref()))
            .collect();
        let persona_interests = metadata
            .persona_interests
            .values()
            .filter_map(|entry| clean(entry.interest.name.as_deref()))
            .collect();
        let memos: Vec<String> = metadata
            .persona_memories
            .values()
            .filter_map(|entry| clean(entry.memo.as_deref()))
            .collect();

        let voice = match identifier("persona_voice_id", metadata.persona_voice_id.as_deref())? {
            Some(id) => VoiceSelection::Named(id),
            None => VoiceSelection::Default,
        };

        Ok(Self {
            user_id: identifier("user_id", metadata.user_id.as_deref())?,
            user_first_name: name("user_first_name", metadata.user_first_name.as_deref())?
                .unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
            user_last_name: name("user_last_name", metadata.user_last_name.as_deref())?,
            user_interests,
            persona_profile_id: identifier(
                "persona_profile_id",
                metadata.persona_profile_id.as_deref(),
            )?,
            persona_name: name("persona_name", metadata.persona_name.as_deref())?
                .unwrap_or_else(|| DEFAULT_PERSONA_NAME.to_string()),
            relationship: name(
                "persona_relationship",
                metadata.persona_relationship.as_deref(),
            )?
            .unwrap_or_else(|| DEFAULT_RELATIONSHIP.to_string()),
            persona_interests,
            memory_digest: digest(&memos),
            voice,
        })
    }

    /// Renders the system prompt handed to the response engine.
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "Name: {persona}\nRole: {relationship}\n\n\
             Instruction: you are talking with {user}. Keep replies short, warm and \
             conversational; they will be spoken aloud.\n",
            persona = self.persona_name,
            relationship = self.relationship,
            user = self.user_first_name,
        );

        if !self.persona_interests.is_empty() {
            prompt.push_str(&format!(
                "\n{}'s interests: {}\n",
                self.persona_name,
                self.persona_interests.join(", ")
            ));
        }
        if !self.user_interests.is_empty() {
            prompt.push_str(&format!(
                "{}'s interests: {}\n",
                self.user_first_name,
                self.user_interests.join(", ")
            ));
        }
        if !self.memory_digest.is_empty() {
            prompt.push_str(&format!(
                "\nMemory of past conversations with {}:\n{}\n",
                self.user_first_name, self.memory_digest
            ));
        }
        prompt
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn name(field: &str, value: Option<&str>) -> Result<Option<String>, SessionError> {
    bounded(field, value, MAX_NAME_CHARS)
}

fn identifier(field: &str, value: Option<&str>) -> Result<Option<String>, SessionError> {
    let value = bounded(field, value, MAX_IDENTIFIER_CHARS)?;
    if let Some(id) = &value {
        if id.chars().any(char::is_whitespace) {
            return Err(SessionError::configuration(format!(
                "{field} must not contain whitespace"
            )));
        }
    }
    Ok(value)
}

fn bounded(
    field: &str,
    value: Option<&str>,
    max_chars: usize,
) -> Result<Option<String>, SessionError> {
    let Some(value) = clean(value) else {
        return Ok(None);
    };
    if value.chars().count() > max_chars {
        return Err(SessionError::configuration(format!(
            "{field} exceeds {max_chars} characters"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(SessionError::configuration(format!(
            "{field} contains control characters"
        )));
    }
    Ok(Some(value))
}

/// Joins memos, keeping the most recent ones when the digest is too long.
fn digest(memos: &[String]) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut total = 0;
    for memo in memos.iter().rev() {
        let len = memo.chars().count() + usize::from(!kept.is_empty());
        if total + len > MAX_MEMORY_DIGEST_CHARS {
            break;
        }
        total += len;
        kept.push(memo);
    }
    kept.reverse();
    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_profile_from_nested_metadata() {
        let metadata: ConversationMetadata = serde_json::from_value(json!({
            "user_first_name": "Ada",
            "user_interests": {"a": {"name": "chess"}, "b": {"name": " hiking "}},
            "persona_name": "Nova",
            "persona_relationship": "friend",
            "persona_interests": {"x": {"interest": {"name": "jazz"}}},
            "persona_memories": {"1": {"memo": "Ada adopted a cat."}, "2": {"memo": "  "}},
            "persona_voice_id": "en-US-JennyNeural"
        }))
        .expect("parse metadata");

        let profile = ConversationProfile::from_metadata(&metadata).expect("valid profile");
        assert_eq!(profile.user_first_name, "Ada");
        assert_eq!(profile.user_interests, vec!["chess", "hiking"]);
        assert_eq!(profile.persona_interests, vec!["jazz"]);
        assert_eq!(profile.memory_digest, "Ada adopted a cat.");
        assert_eq!(
            profile.voice,
            VoiceSelection::Named("en-US-JennyNeural".into())
        );

        let prompt = profile.prompt();
        assert!(prompt.contains("Name: Nova"));
        assert!(prompt.contains("Ada's interests: chess, hiking"));
        assert!(prompt.contains("Ada adopted a cat."));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let profile = ConversationProfile::from_metadata(&ConversationMetadata::default())
            .expect("empty metadata is valid");
        assert_eq!(profile, ConversationProfile::default());
        assert!(!profile.prompt().contains("interests"));
    }

    #[test]
    fn rejects_invalid_identity_fields() {
        let metadata = ConversationMetadata {
            persona_voice_id: Some("voice with spaces".into()),
            ..Default::default()
        };
        let err = ConversationProfile::from_metadata(&metadata).expect_err("invalid voice id");
        assert!(err.is_configuration());

        let metadata = ConversationMetadata {
            persona_name: Some("x".repeat(MAX_NAME_CHARS + 1)),
            ..Default::default()
        };
        assert!(ConversationProfile::from_metadata(&metadata).is_err());
    }

    #[test]
    fn numeric_ids_are_read_as_text() {
        let metadata: ConversationMetadata = serde_json::from_value(json!({
            "user_id": 42,
            "deeva_profile_id": 7,
            "persona_voice_id": "en-US-AriaNeural"
        }))
        .expect("numeric ids parse");
        assert_eq!(metadata.user_id.as_deref(), Some("42"));

        let profile = ConversationProfile::from_metadata(&metadata).expect("valid profile");
        assert_eq!(profile.user_id.as_deref(), Some("42"));
        assert_eq!(profile.persona_profile_id.as_deref(), Some("7"));

        assert!(serde_json::from_value::<ConversationMetadata>(json!({"user_id": [1]})).is_err());
    }

    #[test]
    fn digest_keeps_most_recent_memos() {
        let memos = vec!["a".repeat(3_000), "b".repeat(3_000)];
        assert_eq!(digest(&memos), "b".repeat(3_000));
    }
}
