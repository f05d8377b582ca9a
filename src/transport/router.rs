use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{OutboundFrame, OutputSink};
use crate::events::{EventBus, EventHandler};
use crate::orchestrator::{
    SessionConfig, SessionStats, StageBackends, StageRegistry, SynthesisOptions,
};
use crate::session::{
    ConversationProfile, ConversationSession, SessionParts, TranscriptForwarder,
};

use super::messages::{decode_audio, encode_frame, InboundMessage, StartMessage};
use super::{TransportError, TransportReader, TransportWriter, WireMessage};

/// Accepts a duplex connection and runs one conversation over it, from the
/// start descriptor to `STOP` or disconnect.
#[derive(Debug, Clone)]
pub struct ConversationRouter {
    registry: Arc<StageRegistry>,
    backends: StageBackends,
    config: SessionConfig,
    bus: EventBus,
}

impl ConversationRouter {
    pub fn new(
        registry: StageRegistry,
        backends: StageBackends,
        config: SessionConfig,
        bus: EventBus,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            backends,
            config,
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Serves one connection and returns the session's final statistics.
    ///
    /// Errors before the session starts (missing or invalid start
    /// descriptor, unbuildable stages) are returned; once the session is
    /// running, transport failures end it like a `STOP`.
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> Result<SessionStats>
    where
        R: TransportReader,
        W: TransportWriter + 'static,
    {
        let start = read_start(&mut reader).await?;
        let profile = ConversationProfile::from_metadata(&start.conversation_data)?;
        let stages = self.registry.build(
            &self.backends,
            &start.input_audio_config,
            &start.output_audio_config,
            &profile,
            SynthesisOptions {
                encode_as_wav: true,
            },
        )?;

        let session_id = start
            .conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (sink, frames) = OutputSink::new(
            start.output_audio_config.clone(),
            self.config.sink_capacity,
        );
        let done = CancellationToken::new();
        let writer_task = tokio::spawn(pump_frames(writer, frames, done.clone()));

        let transcript_subscriber: Option<Arc<dyn EventHandler>> = if start.subscribe_transcript {
            Some(Arc::new(TranscriptForwarder::new(
                session_id.as_str(),
                sink.clone(),
            )))
        } else {
            None
        };

        let session = ConversationSession::create(SessionParts {
            session_id,
            input: start.input_audio_config,
            sink: sink.clone(),
            stages,
            bus: self.bus.clone(),
            transcript_subscriber,
            profile,
            config: self.config.clone(),
        })?;

        let ready_sink = sink.clone();
        session.start(move || {
            if let Err(err) = ready_sink.send_ready() {
                warn!(target: "conversation_router", %err, "failed to signal ready");
            }
        })?;

        receive_loop(&session, &mut reader).await;
        session.terminate().await;

        done.cancel();
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(
                target: "conversation_router",
                session_id = session.id(),
                %err,
                "transport writer stopped early"
            ),
            Err(err) => warn!(
                target: "conversation_router",
                session_id = session.id(),
                %err,
                "transport writer task failed"
            ),
        }

        let stats = session.stats();
        info!(
            target: "conversation_router",
            session_id = session.id(),
            chunks_received = stats.chunks_received,
            audio_chunks_sent = stats.audio_chunks_sent,
            "conversation closed"
        );
        Ok(stats)
    }
}

async fn read_start<R: TransportReader>(reader: &mut R) -> Result<StartMessage> {
    let message = reader
        .recv()
        .await
        .context("failed to read start descriptor")?
        .ok_or_else(|| anyhow!("transport closed before the start descriptor"))?;

    let WireMessage::Text(text) = message else {
        bail!("expected a start descriptor, received a binary frame");
    };
    match InboundMessage::parse(&text)? {
        InboundMessage::AudioConfigStart(start) => Ok(start),
        other => bail!("expected a start descriptor, received {other:?}"),
    }
}

async fn receive_loop<R: TransportReader>(session: &ConversationSession, reader: &mut R) {
    loop {
        let received = tokio::select! {
            biased;
            _ = session.stopped() => break,
            received = reader.recv() => received,
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!(
                    target: "conversation_router",
                    session_id = session.id(),
                    "client disconnected"
                );
                break;
            }
            Err(err) => {
                warn!(
                    target: "conversation_router",
                    session_id = session.id(),
                    %err,
                    "transport receive failed"
                );
                break;
            }
        };

        match message {
            WireMessage::Binary(chunk) => session.receive_audio(chunk).await,
            WireMessage::Text(text) => match InboundMessage::parse(&text) {
                Ok(InboundMessage::Audio { data }) => match decode_audio(&data) {
                    Ok(chunk) => session.receive_audio(chunk).await,
                    Err(err) => warn!(
                        target: "conversation_router",
                        session_id = session.id(),
                        %err,
                        "dropping undecodable audio message"
                    ),
                },
                Ok(InboundMessage::Stop) => {
                    info!(
                        target: "conversation_router",
                        session_id = session.id(),
                        "client requested stop"
                    );
                    break;
                }
                Ok(InboundMessage::AudioConfigStart(_)) => warn!(
                    target: "conversation_router",
                    session_id = session.id(),
                    "ignoring repeated start descriptor"
                ),
                Err(err) => warn!(
                    target: "conversation_router",
                    session_id = session.id(),
                    %err,
                    "ignoring malformed control message"
                ),
            },
        }
    }
}

/// Drains the sink onto the transport in order. After `done` fires, frames
/// already queued are still written before the writer is flushed.
async fn pump_frames<W: TransportWriter>(
    mut writer: W,
    mut frames: mpsc::Receiver<OutboundFrame>,
    done: CancellationToken,
) -> Result<(), TransportError> {
    let binary = writer.supports_binary();
    loop {
        let frame = tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = done.cancelled() => {
                while let Ok(frame) = frames.try_recv() {
                    writer.send(encode_frame(frame, binary)?).await?;
                }
                break;
            }
        };
        writer.send(encode_frame(frame, binary)?).await?;
    }
    writer.flush().await
}
