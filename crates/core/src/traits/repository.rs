//! Chat persistence port
//!
//! Used by callers that wrap the pipeline (worker consumers, sinks); the
//! pipeline core itself never writes.

use async_trait::async_trait;

use crate::{Citation, Result};

#[async_trait]
pub trait ChatRepository: Send + Sync + 'static {
    /// Persist the final assistant message; returns
    /// `(message_id, message_index, turn)`.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_assistant_message(
        &self,
        session_id: &str,
        job_id: &str,
        content: &str,
        sources: Option<serde_json::Value>,
        usage_prompt: Option<u32>,
        usage_completion: Option<u32>,
    ) -> Result<(String, i64, i64)>;

    async fn save_message_citations(
        &self,
        message_id: &str,
        session_id: &str,
        citations: &[Citation],
    ) -> Result<()>;

    async fn append_job_event(
        &self,
        job_id: &str,
        user_id: &str,
        session_id: Option<&str>,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<()>;

    async fn update_job_status(
        &self,
        job_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<()>;
}
