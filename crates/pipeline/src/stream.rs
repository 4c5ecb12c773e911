//! Stream context and event emission helpers
//!
//! Events are published to the stream bus and mirrored to the durable
//! recorder. Publication is fire-and-forget; a failing recorder only logs
//! a warning. Both paths are skipped entirely unless the context carries a
//! sink plus job and user ids.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use chat_worker_core::EventSink;

use crate::events::{RagSearchEvent, RagStageEvent};

/// Per-request stream handles and ids for telemetry.
#[derive(Clone, Default)]
pub struct StreamContext {
    pub sink: Option<Arc<dyn EventSink>>,
    pub job_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext")
            .field("sink", &self.sink.is_some())
            .field("job_id", &self.job_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl StreamContext {
    pub fn new(
        sink: Arc<dyn EventSink>,
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            sink: Some(sink),
            job_id: Some(job_id.into()),
            user_id: Some(user_id.into()),
            session_id,
        }
    }

    /// Telemetry requires a sink plus job and user ids.
    pub fn has_stream(&self) -> bool {
        self.sink.is_some() && self.job_id.is_some() && self.user_id.is_some()
    }

    fn ids(&self) -> Option<(Arc<dyn EventSink>, String, String)> {
        let sink = self.sink.clone()?;
        let job_id = self.job_id.clone()?;
        let user_id = self.user_id.clone()?;
        Some((sink, job_id, user_id))
    }

    /// Emit a retrieve-stage lifecycle event.
    pub async fn emit_search_event(
        &self,
        event: &str,
        query: Option<&str>,
        hits: Option<usize>,
        took_ms: Option<u64>,
    ) {
        let Some((sink, job_id, user_id)) = self.ids() else {
            return;
        };
        let payload = RagSearchEvent {
            event: event.to_string(),
            job_id,
            user_id,
            session_id: self.session_id.clone(),
            query: query.map(str::to_string),
            hits,
            took_ms,
        };
        self.publish_and_record(&sink, event, serde_json::to_value(&payload).ok())
            .await;
    }

    /// Emit a rerank/mmr/compress lifecycle event. The caller fills the
    /// stage fields; envelope ids are set here.
    pub async fn emit_stage_event(&self, mut event: RagStageEvent) {
        let Some((sink, job_id, user_id)) = self.ids() else {
            return;
        };
        event.job_id = job_id;
        event.user_id = user_id;
        event.session_id = self.session_id.clone();
        let name = event.event.clone();
        self.publish_and_record(&sink, &name, serde_json::to_value(&event).ok())
            .await;
    }

    async fn publish_and_record(
        &self,
        sink: &Arc<dyn EventSink>,
        event_type: &str,
        payload: Option<Value>,
    ) {
        let Some(payload) = payload else { return };

        sink.publish(payload.clone()).await;

        // Durable mirror without the stream envelope fields.
        let mut recorded = payload;
        if let Value::Object(map) = &mut recorded {
            for key in ["event", "jobId", "userId", "sessionId"] {
                map.remove(key);
            }
        }
        if let Err(err) = sink.record_event(event_type, recorded).await {
            warn!("job event persist failed: {err}");
        }
    }
}
