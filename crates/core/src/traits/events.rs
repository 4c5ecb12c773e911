//! Event stream port

use async_trait::async_trait;

use crate::Result;

/// Stream bus + durable event mirror.
///
/// `publish` is fire-and-forget: the pipeline never fails a stage because a
/// telemetry write failed. `record_event` is the durable mirror used for
/// job-event persistence; its payload has the envelope fields (`event`,
/// `jobId`, `userId`, `sessionId`) stripped by the caller before recording.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, event: serde_json::Value);

    async fn record_event(&self, event_type: &str, payload: serde_json::Value) -> Result<()>;
}
