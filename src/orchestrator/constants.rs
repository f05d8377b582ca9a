use std::time::Duration;

pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 32;
pub(crate) const DEFAULT_SINK_CAPACITY: usize = 64;
pub(crate) const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(250);
pub(crate) const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
pub(crate) const DEFAULT_HARD_CANCEL_TIMEOUT: Duration = Duration::from_millis(250);

pub(crate) const SPEECH_RMS_THRESHOLD: f32 = 2e-2;
pub(crate) const ENDPOINT_SILENT_CHUNKS: usize = 8;

pub(crate) const SYNTH_CHUNK_DURATION: Duration = Duration::from_millis(100);
pub(crate) const SYNTH_WORD_DURATION: Duration = Duration::from_millis(180);
pub(crate) const SYNTH_TONE_HZ: f32 = 220.0;
pub(crate) const SYNTH_TONE_AMPLITUDE: f32 = 0.2;
