//! Ordered outbound channel shared by synthesized audio and sideband notices.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::debug;

use crate::audio::{AudioChunk, OutputAudioConfig};
use crate::error::SinkError;
use crate::events::{Event, EventPayload, TranscriptNotice};

/// One unit written to the transport, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Ready,
    Audio(AudioChunk),
    Transcript(TranscriptNotice),
}

struct SinkInner {
    output: OutputAudioConfig,
    tx: mpsc::Sender<OutboundFrame>,
    closed: AtomicBool,
    audio_frames: AtomicU64,
}

/// Audio output sink handed to the session and to transcript subscribers.
///
/// Cloning yields another handle onto the same ordered channel. The channel
/// is bounded: audio waits for the transport writer, sideband notices are
/// refused with [`SinkError::Full`] instead of waiting.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("output", &self.inner.output)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl OutputSink {
    /// Creates a sink buffering at most `capacity` frames ahead of the reader.
    pub fn new(
        output: OutputAudioConfig,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            inner: Arc::new(SinkInner {
                output,
                tx,
                closed: AtomicBool::new(false),
                audio_frames: AtomicU64::new(0),
            }),
        };
        (sink, rx)
    }

    pub fn output_config(&self) -> &OutputAudioConfig {
        &self.inner.output
    }

    /// Appends an audio chunk, suspending while the buffer is full.
    pub async fn send(&self, chunk: AudioChunk) -> Result<(), SinkError> {
        self.ensure_open()?;
        if self.inner.tx.send(OutboundFrame::Audio(chunk)).await.is_err() {
            return Err(self.disconnected());
        }
        self.inner.audio_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Like [`send`](Self::send), but gives up with [`SinkError::Full`] once
    /// `wait` elapses without room in the buffer.
    pub async fn send_timeout(&self, chunk: AudioChunk, wait: Duration) -> Result<(), SinkError> {
        self.ensure_open()?;
        match self
            .inner
            .tx
            .send_timeout(OutboundFrame::Audio(chunk), wait)
            .await
        {
            Ok(()) => {
                self.inner.audio_frames.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::Full),
            Err(SendTimeoutError::Closed(_)) => Err(self.disconnected()),
        }
    }

    /// Signals the client that it may start streaming audio.
    pub fn send_ready(&self) -> Result<(), SinkError> {
        self.try_push(OutboundFrame::Ready)
    }

    /// Pushes a transcript notice through the same ordered channel as audio.
    /// Events without a transcript payload are ignored.
    pub fn consume_transcript(&self, event: &Event) -> Result<(), SinkError> {
        match event.payload() {
            EventPayload::Transcript(transcript) => self.try_push(OutboundFrame::Transcript(
                TranscriptNotice::from_event(event, transcript),
            )),
            other => {
                debug!(
                    target: "output_sink",
                    event_type = other.event_type().as_str(),
                    "ignoring non-transcript event"
                );
                Ok(())
            }
        }
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(
                target: "output_sink",
                audio_frames = self.audio_frames_sent(),
                "output sink closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn audio_frames_sent(&self) -> u64 {
        self.inner.audio_frames.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), SinkError> {
        if self.is_closed() {
            Err(SinkError::Closed)
        } else {
            Ok(())
        }
    }

    fn try_push(&self, frame: OutboundFrame) -> Result<(), SinkError> {
        self.ensure_open()?;
        match self.inner.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Closed(_)) => Err(self.disconnected()),
        }
    }

    /// Transport writer is gone; nothing downstream will read again.
    fn disconnected(&self) -> SinkError {
        self.close();
        SinkError::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioEncoding;
    use crate::events::{Speaker, TranscriptEvent};
    use bytes::Bytes;
    use tokio::time::timeout;

    fn sink(capacity: usize) -> (OutputSink, mpsc::Receiver<OutboundFrame>) {
        OutputSink::new(
            OutputAudioConfig {
                sampling_rate: 24_000,
                audio_encoding: AudioEncoding::Linear16,
            },
            capacity,
        )
    }

    #[tokio::test]
    async fn preserves_order_across_audio_and_transcripts() {
        let (sink, mut rx) = sink(8);
        let transcript = Event::new(
            "session-1",
            EventPayload::Transcript(TranscriptEvent {
                speaker: Speaker::Bot,
                text: "hello".into(),
            }),
        );

        sink.send_ready().expect("ready");
        sink.send(Bytes::from_static(&[1, 2])).await.expect("first chunk");
        sink.consume_transcript(&transcript).expect("transcript");
        sink.send(Bytes::from_static(&[3, 4])).await.expect("second chunk");

        assert_eq!(rx.try_recv().expect("ready frame"), OutboundFrame::Ready);
        assert_eq!(
            rx.try_recv().expect("audio frame"),
            OutboundFrame::Audio(Bytes::from_static(&[1, 2]))
        );
        match rx.try_recv().expect("transcript frame") {
            OutboundFrame::Transcript(notice) => {
                assert_eq!(notice.text, "hello");
                assert_eq!(notice.sender, Speaker::Bot);
                assert_eq!(notice.session_id, "session-1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(
            rx.try_recv().expect("audio frame"),
            OutboundFrame::Audio(Bytes::from_static(&[3, 4]))
        );
        assert_eq!(sink.audio_frames_sent(), 2);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (sink, mut rx) = sink(8);
        sink.close();

        assert_eq!(
            sink.send(Bytes::from_static(&[0])).await,
            Err(SinkError::Closed)
        );
        assert_eq!(sink.send_ready(), Err(SinkError::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_closes_sink() {
        let (sink, rx) = sink(8);
        drop(rx);

        assert_eq!(
            sink.send(Bytes::from_static(&[0])).await,
            Err(SinkError::Closed)
        );
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn full_buffer_refuses_instead_of_growing() {
        let (sink, mut rx) = sink(2);
        sink.send_ready().expect("ready");
        sink.send(Bytes::from_static(&[1])).await.expect("fills buffer");

        assert_eq!(
            sink.send_timeout(Bytes::from_static(&[2]), Duration::from_millis(5))
                .await,
            Err(SinkError::Full)
        );
        let notice = Event::new(
            "session-1",
            EventPayload::Transcript(TranscriptEvent {
                speaker: Speaker::Human,
                text: "hi".into(),
            }),
        );
        assert_eq!(sink.consume_transcript(&notice), Err(SinkError::Full));
        assert!(!sink.is_closed());
        assert_eq!(sink.audio_frames_sent(), 1);

        assert_eq!(rx.recv().await, Some(OutboundFrame::Ready));
        sink.send_timeout(Bytes::from_static(&[3]), Duration::from_millis(5))
            .await
            .expect("room after the reader caught up");
        assert_eq!(sink.audio_frames_sent(), 2);
    }

    #[tokio::test]
    async fn send_waits_for_the_reader() {
        let (sink, mut rx) = sink(1);
        sink.send(Bytes::from_static(&[1])).await.expect("first chunk");

        let pending = sink.send(Bytes::from_static(&[2]));
        tokio::pin!(pending);
        assert!(timeout(Duration::from_millis(20), &mut pending).await.is_err());

        assert_eq!(
            rx.recv().await,
            Some(OutboundFrame::Audio(Bytes::from_static(&[1])))
        );
        timeout(Duration::from_secs(1), pending)
            .await
            .expect("send resumes")
            .expect("second chunk");
    }

    #[test]
    fn non_transcript_events_are_ignored() {
        let (sink, mut rx) = sink(8);
        let started = Event::new("session-1", EventPayload::SessionStarted);

        sink.consume_transcript(&started).expect("ignored");
        assert!(rx.try_recv().is_err());
    }
}
