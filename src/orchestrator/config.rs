use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::orchestrator::constants::{
    DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_GRACE_PERIOD, DEFAULT_HARD_CANCEL_TIMEOUT,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SINK_CAPACITY,
};

pub const ENV_QUEUE_CAPACITY: &str = "PARLEY_QUEUE_CAPACITY";
pub const ENV_SINK_CAPACITY: &str = "PARLEY_SINK_CAPACITY";
pub const ENV_ENQUEUE_TIMEOUT_MS: &str = "PARLEY_ENQUEUE_TIMEOUT_MS";
pub const ENV_GRACE_PERIOD_MS: &str = "PARLEY_GRACE_PERIOD_MS";
pub const ENV_TRANSCRIPTION_BACKEND: &str = "PARLEY_TRANSCRIPTION_BACKEND";
pub const ENV_RESPONSE_BACKEND: &str = "PARLEY_RESPONSE_BACKEND";
pub const ENV_SYNTHESIS_BACKEND: &str = "PARLEY_SYNTHESIS_BACKEND";

/// Runtime knobs for one session's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of every inter-stage queue.
    pub queue_capacity: usize,
    /// Outbound frames buffered ahead of the transport writer.
    pub sink_capacity: usize,
    /// How long a producer suspends on a full queue before dropping.
    #[serde(with = "millis")]
    pub enqueue_timeout: Duration,
    /// Time allowed for in-flight work to drain on terminate.
    #[serde(with = "millis")]
    pub grace_period: Duration,
    /// Extra wait after cancellation before workers are aborted.
    #[serde(with = "millis")]
    pub hard_cancel_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            hard_cancel_timeout: DEFAULT_HARD_CANCEL_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(capacity) = env_parse::<usize>(ENV_QUEUE_CAPACITY)? {
            config.queue_capacity = capacity;
        }
        if let Some(capacity) = env_parse::<usize>(ENV_SINK_CAPACITY)? {
            config.sink_capacity = capacity;
        }
        if let Some(ms) = env_parse::<u64>(ENV_ENQUEUE_TIMEOUT_MS)? {
            config.enqueue_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>(ENV_GRACE_PERIOD_MS)? {
            config.grace_period = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.queue_capacity == 0 {
            return Err(SessionError::configuration(
                "queue capacity must be greater than zero",
            ));
        }
        if self.sink_capacity == 0 {
            return Err(SessionError::configuration(
                "sink capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionBackend {
    Deepgram,
    #[default]
    Energy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBackend {
    LanguageModel,
    #[default]
    Echo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisBackend {
    Azure,
    #[default]
    Tone,
}

macro_rules! backend_names {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(anyhow::anyhow!(
                        "unknown {} backend `{other}`",
                        stringify!($ty)
                    )),
                }
            }
        }
    };
}

backend_names!(TranscriptionBackend { Deepgram => "deepgram", Energy => "energy" });
backend_names!(ResponseBackend { LanguageModel => "language_model", Echo => "echo" });
backend_names!(SynthesisBackend { Azure => "azure", Tone => "tone" });

/// Which concrete implementation backs each stage kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageBackends {
    pub transcription: TranscriptionBackend,
    pub response: ResponseBackend,
    pub synthesis: SynthesisBackend,
}

impl StageBackends {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut backends = Self::default();
        if let Some(backend) = env_parse(ENV_TRANSCRIPTION_BACKEND)? {
            backends.transcription = backend;
        }
        if let Some(backend) = env_parse(ENV_RESPONSE_BACKEND)? {
            backends.response = backend;
        }
        if let Some(backend) = env_parse(ENV_SYNTHESIS_BACKEND)? {
            backends.synthesis = backend;
        }
        Ok(backends)
    }
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("invalid value for {key}: {err}")),
        _ => Ok(None),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn parses_backend_names_case_insensitively() {
        assert_eq!(
            "Deepgram".parse::<TranscriptionBackend>().expect("parse"),
            TranscriptionBackend::Deepgram
        );
        assert_eq!(
            " tone ".parse::<SynthesisBackend>().expect("parse"),
            SynthesisBackend::Tone
        );
        assert!("whisper".parse::<TranscriptionBackend>().is_err());
    }

    #[test]
    fn defaults_use_offline_backends() {
        let backends = StageBackends::default();
        assert_eq!(backends.transcription, TranscriptionBackend::Energy);
        assert_eq!(backends.response, ResponseBackend::Echo);
        assert_eq!(backends.synthesis, SynthesisBackend::Tone);
    }

    #[test]
    fn reads_session_config_from_env() {
        let _lock = env_guard().lock().expect("env guard poisoned");
        std::env::set_var(ENV_QUEUE_CAPACITY, "10");
        std::env::set_var(ENV_GRACE_PERIOD_MS, "500");
        let config = SessionConfig::from_env();
        std::env::remove_var(ENV_QUEUE_CAPACITY);
        std::env::remove_var(ENV_GRACE_PERIOD_MS);

        let config = config.expect("valid env config");
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.enqueue_timeout, DEFAULT_ENQUEUE_TIMEOUT);
    }

    #[test]
    fn rejects_malformed_env_values() {
        let _lock = env_guard().lock().expect("env guard poisoned");
        std::env::set_var(ENV_SYNTHESIS_BACKEND, "espeak");
        let result = StageBackends::from_env();
        std::env::remove_var(ENV_SYNTHESIS_BACKEND);

        assert!(result.is_err());
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        let config = SessionConfig {
            queue_capacity: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().expect_err("zero capacity").is_configuration());

        let config = SessionConfig {
            sink_capacity: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_durations_as_millis() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"queue_capacity":4,"grace_period":1500}"#)
                .expect("parse config");
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.grace_period, Duration::from_millis(1_500));
        assert_eq!(config.hard_cancel_timeout, DEFAULT_HARD_CANCEL_TIMEOUT);
        assert_eq!(config.sink_capacity, DEFAULT_SINK_CAPACITY);
    }
}
