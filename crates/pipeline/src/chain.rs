//! Staged pipeline coordinator
//!
//! Orchestrates retrieve -> rerank -> mmr -> compress -> join-context ->
//! prompt over a request-scoped [`RagState`], emitting lifecycle telemetry
//! around each stage. Any stage failure stops the run; later stages are
//! skipped and no further completion events are emitted.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use chat_worker_core::{
    total_chars, Citation, Document, Embeddings, Error, LlmCompressor, Reranker, Result,
    SearchBackend, SearchMode,
};
use chat_worker_config::Settings;
use chat_worker_rag::{
    compress_docs, kw_tokens, mmr_select, BackendRetriever, CompressOptions, EmbeddingsFilter,
    MmrConfig, RetrieveOptions, RetrieverConfig,
};

use crate::events::{finite, RagStageEvent};
use crate::overrides::RagOverrides;
use crate::prompt::{ChatPrompt, PromptTemplate};
use crate::state::RagState;
use crate::stream::StreamContext;

/// Context string used when no relevant documents survive.
pub const NO_CONTEXT_PLACEHOLDER: &str =
    "No relevant documents were found. Providing a general answer to the question.";

/// Pipeline entry value.
#[derive(Debug)]
pub struct PipelineInput {
    pub question: String,
    pub rag: RagOverrides,
    pub stream: StreamContext,
}

/// Final pipeline output: the rendered prompt plus ordered citations.
#[derive(Debug, Clone)]
pub struct PromptResult {
    pub prompt: ChatPrompt,
    pub citations: Vec<Citation>,
}

/// RAG pipeline that builds a prompt with retrieved context.
///
/// Prepares the final prompt variables but does not call an LLM directly;
/// the caller is responsible for invoking the model.
pub struct RagPipeline {
    settings: Settings,
    retriever: BackendRetriever,
    reranker: Option<Arc<dyn Reranker>>,
    llm_compressor: Option<Arc<dyn LlmCompressor>>,
    filter: EmbeddingsFilter,
    template: PromptTemplate,
}

impl RagPipeline {
    pub fn new(
        settings: Settings,
        backend: Arc<dyn SearchBackend>,
        embeddings: Arc<dyn Embeddings>,
    ) -> Self {
        let retriever_config = RetrieverConfig::from(&settings.rag);
        let template = PromptTemplate::new(settings.rag.rag_prompt.clone());
        // Threshold is replaced per adaptive step inside compression.
        let filter = EmbeddingsFilter::new(embeddings, 0.0);
        Self {
            settings,
            retriever: BackendRetriever::new(backend, retriever_config),
            reranker: None,
            llm_compressor: None,
            filter,
            template,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_llm_compressor(mut self, compressor: Arc<dyn LlmCompressor>) -> Self {
        self.llm_compressor = Some(compressor);
        self
    }

    /// Run the full state machine and return the prompt plus citations.
    pub async fn run(&self, input: PipelineInput) -> Result<PromptResult> {
        let mut state = RagState::new(input.question, input.rag, input.stream);

        self.stage_retrieve(&mut state).await?;
        self.stage_rerank(&mut state).await?;
        self.stage_mmr(&mut state).await?;
        self.stage_compress(&mut state).await?;
        self.stage_join_context(&mut state).await?;
        self.stage_prompt(&mut state).await?;

        let prompt = state
            .prompt
            .take()
            .ok_or_else(|| Error::InvalidInput("pipeline produced no prompt".to_string()))?;
        Ok(PromptResult {
            prompt,
            citations: std::mem::take(&mut state.citations),
        })
    }

    /// Expand the query, fan out to the backend, merge and dedup.
    pub async fn stage_retrieve(&self, state: &mut RagState) -> Result<()> {
        let question = state.question.trim().to_string();
        if question.is_empty() {
            return Err(Error::InvalidInput("missing question".to_string()));
        }

        state
            .stream
            .emit_search_event("rag_retrieve.in_progress", Some(&question), None, None)
            .await;
        let started = Instant::now();

        let opts = RetrieveOptions {
            top_k: state.rag.top_k,
            mmq: state.rag.mmq,
            filters: state.rag.filters.clone(),
            search_type: state
                .rag
                .search_type
                .as_deref()
                .and_then(SearchMode::parse),
            alpha: finite(state.rag.alpha),
        };
        debug!(?opts, "retrieve stage config");

        let docs = self.retriever.retrieve(&question, &opts).await?;
        let hits = docs.len();
        state.docs = Some(docs);

        state
            .stream
            .emit_search_event(
                "rag_retrieve.completed",
                Some(&question),
                Some(hits),
                Some(started.elapsed().as_millis() as u64),
            )
            .await;
        Ok(())
    }

    /// Rerank retrieved docs; a missing reranker passes them through.
    pub async fn stage_rerank(&self, state: &mut RagState) -> Result<()> {
        let input = state.docs.clone().unwrap_or_default();
        let input_hits = input.len();
        let input_chars = total_chars(&input);
        let snapshot = self
            .reranker
            .as_ref()
            .and_then(|r| r.config_snapshot())
            .unwrap_or_default();

        let base_event = |event: &str| RagStageEvent {
            event: event.to_string(),
            query: Some(state.question.clone()),
            input_hits: Some(input_hits),
            input_chars: Some(input_chars),
            reranker: snapshot.name.clone(),
            rerank_top_n: snapshot.top_n,
            rerank_max_candidates: snapshot.max_candidates,
            rerank_batch_size: snapshot.batch_size,
            rerank_max_doc_chars: snapshot.max_doc_chars,
            ..Default::default()
        };

        state
            .stream
            .emit_stage_event(base_event("rag_rerank.in_progress"))
            .await;
        let started = Instant::now();

        let reranked = match &self.reranker {
            Some(reranker) => reranker.rerank(&state.question, input).await?,
            None => input,
        };
        debug!(reranked = reranked.len(), "rerank stage done");

        let mut completed = base_event("rag_rerank.completed");
        completed.output_hits = Some(reranked.len());
        completed.output_chars = Some(total_chars(&reranked));
        completed.took_ms = Some(started.elapsed().as_millis() as u64);
        state.reranked_docs = Some(reranked);
        state.stream.emit_stage_event(completed).await;
        Ok(())
    }

    /// Diversify the reranked docs with MMR.
    pub async fn stage_mmr(&self, state: &mut RagState) -> Result<()> {
        let input = state
            .reranked_docs
            .clone()
            .or_else(|| state.docs.clone())
            .unwrap_or_default();

        let cfg = self.mmr_config(&state.rag, input.len());

        let base_event = |event: &str| RagStageEvent {
            event: event.to_string(),
            query: Some(state.question.clone()),
            input_hits: Some(input.len()),
            input_chars: Some(total_chars(&input)),
            mmr_k: Some(cfg.k),
            mmr_fetch_k: Some(cfg.fetch_k),
            mmr_lambda: finite(Some(cfg.lambda_mult)),
            mmr_similarity_threshold: finite(cfg.similarity_threshold),
            ..Default::default()
        };

        state
            .stream
            .emit_stage_event(base_event("rag_mmr.in_progress"))
            .await;
        let started = Instant::now();

        let selected = if input.is_empty() {
            Vec::new()
        } else {
            mmr_select(&input, &cfg, None)
        };
        debug!(mmr = selected.len(), "mmr stage done");

        let mut completed = base_event("rag_mmr.completed");
        completed.output_hits = Some(selected.len());
        completed.output_chars = Some(total_chars(&selected));
        completed.took_ms = Some(started.elapsed().as_millis() as u64);
        state.mmr_docs = Some(selected);
        state.stream.emit_stage_event(completed).await;
        Ok(())
    }

    fn mmr_config(&self, rag: &RagOverrides, input_len: usize) -> MmrConfig {
        let rag_settings = &self.settings.rag;
        // Without explicit sizes the stage reorders for diversity but
        // keeps every doc.
        let k = rag
            .mmr_k
            .or(rag_settings.mmr_k)
            .unwrap_or(input_len)
            .max(1);
        let fetch_k = rag
            .mmr_fetch_k
            .or(rag_settings.mmr_fetch_k)
            .unwrap_or(input_len)
            .max(k);
        let lambda_mult = rag
            .mmr_lambda
            .filter(|l| l.is_finite())
            .unwrap_or(rag_settings.mmr_lambda_mult)
            .clamp(0.0, 1.0);
        let similarity_threshold = match rag.mmr_similarity_threshold {
            Some(value) => value,
            None => rag_settings.mmr_similarity_threshold,
        };
        MmrConfig {
            lambda_mult,
            k,
            fetch_k,
            similarity_threshold,
        }
    }

    /// Two-tier compression within the context budget.
    pub async fn stage_compress(&self, state: &mut RagState) -> Result<()> {
        let input = state
            .mmr_docs
            .clone()
            .or_else(|| state.reranked_docs.clone())
            .or_else(|| state.docs.clone())
            .unwrap_or_default();

        let max_context = state.rag.max_context.unwrap_or(self.settings.rag.max_context);
        let use_llm = state.rag.use_llm.unwrap_or(self.settings.rag.use_llm);

        let base_event = |event: &str| RagStageEvent {
            event: event.to_string(),
            query: Some(state.question.clone()),
            input_hits: Some(input.len()),
            input_chars: Some(total_chars(&input)),
            max_context: Some(max_context),
            use_llm: Some(use_llm),
            ..Default::default()
        };

        state
            .stream
            .emit_stage_event(base_event("rag_compress.in_progress"))
            .await;
        let started = Instant::now();

        let tokens = kw_tokens(&state.question, &self.settings.rag.ko_stop_tokens);
        let options = CompressOptions {
            max_context: Some(max_context),
            use_llm,
            settings: self.settings.compress.clone(),
        };
        let outcome = compress_docs(
            &state.question,
            &tokens,
            &input,
            Some(&self.filter),
            self.llm_compressor.as_deref(),
            &options,
        )
        .await?;
        debug!(
            compressed = outcome.docs.len(),
            heuristic_hits = outcome.heuristic_hits,
            llm_applied = outcome.llm_applied,
            "compress stage done"
        );

        let mut completed = base_event("rag_compress.completed");
        completed.output_hits = Some(outcome.docs.len());
        completed.output_chars = Some(total_chars(&outcome.docs));
        completed.heuristic_hits = Some(outcome.heuristic_hits);
        completed.llm_applied = Some(outcome.llm_applied);
        completed.took_ms = Some(started.elapsed().as_millis() as u64);

        state.compressed_docs = Some(outcome.docs);
        state.heuristic_hits = Some(outcome.heuristic_hits);
        state.llm_applied = Some(outcome.llm_applied);
        state.stream.emit_stage_event(completed).await;
        Ok(())
    }

    /// Pack documents into the context string and assemble citations.
    pub async fn stage_join_context(&self, state: &mut RagState) -> Result<()> {
        let docs = state.best_docs().to_vec();
        if docs.is_empty() {
            warn!("no relevant documents found for query");
            state.context = Some(NO_CONTEXT_PLACEHOLDER.to_string());
            state.citations = Vec::new();
            return Ok(());
        }

        let budget = state.rag.max_context.unwrap_or(self.settings.rag.max_context);
        let (context, citations) = join_context(&docs, Some(budget));
        state.context = Some(context);
        state.citations = citations;
        Ok(())
    }

    /// Render the final two-message prompt.
    pub async fn stage_prompt(&self, state: &mut RagState) -> Result<()> {
        let context = state.context.clone().unwrap_or_default();
        let prompt = self.template.render(&state.question, &context);
        for message in prompt.to_messages() {
            debug!(role = ?message.role, content = %message.content, "prompt message");
        }
        state.prompt = Some(prompt);
        Ok(())
    }
}

/// Pack documents into a single context string with file and section
/// headers, respecting the character budget. Citations are 1:1 with the
/// packed documents.
pub fn join_context(docs: &[Document], budget: Option<usize>) -> (String, Vec<Citation>) {
    let mut buf: Vec<String> = Vec::new();
    let mut citations: Vec<Citation> = Vec::new();
    let mut total = 0usize;

    for d in docs {
        let txt = &d.page_content;
        let title = d
            .title
            .as_deref()
            .or_else(|| d.meta_str("filename"))
            .unwrap_or("Untitled");
        let section = d.meta_str("section").unwrap_or("");

        let ln = txt.chars().count();
        if let Some(budget) = budget {
            if total + ln > budget {
                debug!(
                    file = title,
                    need = ln,
                    left = budget.saturating_sub(total),
                    "context pack skip due to budget"
                );
                continue;
            }
        }

        let header = if section.is_empty() {
            format!("[{title}]")
        } else {
            format!("[{title}] > {section}")
        };
        buf.push(format!("{header}\n{txt}\n"));
        total += ln;

        citations.push(Citation::for_doc(d, citations.len()));
    }

    (buf.join("\n---\n"), citations)
}
