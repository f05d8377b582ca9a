use anyhow::Result;
use parley_core::orchestrator::{SessionConfig, StageBackends, StageRegistry};
use parley_core::telemetry::init_tracing;
use parley_core::transport::{lines, ConversationRouter};
use parley_core::EventBus;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = SessionConfig::from_env()?;
    let backends = StageBackends::from_env()?;
    let bus = EventBus::new();
    let router = ConversationRouter::new(StageRegistry::with_builtin(), backends, config, bus);

    info!(
        target: "conversation_router",
        transcription = backends.transcription.as_str(),
        response = backends.response.as_str(),
        synthesis = backends.synthesis.as_str(),
        "serving one conversation over stdin/stdout"
    );

    let (reader, writer) = lines::stdio();
    let stats = router.serve(reader, writer).await?;
    info!(
        target: "conversation_router",
        stats = %serde_json::to_string(&stats)?,
        "conversation finished"
    );
    Ok(())
}
