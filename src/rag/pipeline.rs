use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    DEGRADED_MESSAGE, PipelineState, PipelineStatus, QUERY_FAILED_MESSAGE, UNAVAILABLE_MESSAGE,
    answer_error_message, build_context, is_degraded,
};
use crate::config::Config;
use crate::embedder::Embedder;
use crate::generator::{Generator, TokenStream};
use crate::index::{IndexError, VectorIndex};
use crate::indexer::Indexer;
use crate::ingest::DocumentSource;
use crate::session::Message;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub top_k: usize,
    pub history_window: usize,
    pub initial_limit: usize,
    pub refresh_limit: usize,
    pub refresh_check_interval: Duration,
    pub refresh_min_age: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            top_k: config.search_top_k,
            history_window: config.history_window,
            initial_limit: config.feed.initial_limit,
            refresh_limit: config.feed.refresh_limit,
            refresh_check_interval: Duration::from_secs(config.refresh.check_interval_secs),
            refresh_min_age: Duration::from_secs(config.refresh.min_age_secs),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn single(message: impl Into<String>) -> TokenStream {
    stream::once(futures::future::ready(message.into())).boxed()
}

/// Shared orchestrator: one instance serves every session and the refresh
/// loop.
pub struct RagPipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    indexer: Indexer,
    source: Arc<dyn DocumentSource>,
    generator: Arc<dyn Generator>,
    options: PipelineOptions,
    state: Mutex<PipelineState>,
    init_lock: TokioMutex<()>,
    refresh_lock: TokioMutex<()>,
}

impl RagPipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        source: Arc<dyn DocumentSource>,
        generator: Arc<dyn Generator>,
        options: PipelineOptions,
    ) -> Self {
        let indexer = Indexer::new(index.clone(), embedder.clone(), options.chunk_size);
        Self {
            index,
            embedder,
            indexer,
            source,
            generator,
            options,
            state: Mutex::new(PipelineState::default()),
            init_lock: TokioMutex::new(()),
            refresh_lock: TokioMutex::new(()),
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_state(&self, f: impl FnOnce(&mut PipelineState)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *state);
    }

    pub async fn status(&self) -> PipelineStatus {
        if !self.state().initialized {
            PipelineStatus::Uninitialized
        } else if self.index.size().await > 0 {
            PipelineStatus::Ready
        } else {
            PipelineStatus::ReadyEmpty
        }
    }

    /// Fills the index from the document source.
    ///
    /// Marks the pipeline initialized even when nothing could be ingested or
    /// the index store is unreachable, so requests do not retry ingestion.
    /// Only a rejected upsert into an empty index leaves it uninitialized.
    pub async fn initialize(&self) -> Result<PipelineStatus, IndexError> {
        let _guard = self.init_lock.lock().await;
        if self.state().initialized {
            info!("RAG pipeline already initialized");
            return Ok(self.status().await);
        }

        info!("Initializing RAG pipeline");
        let documents = self.source.fetch_documents(self.options.initial_limit).await;

        if documents.is_empty() {
            warn!("No articles fetched during initialization");
        } else {
            info!("Fetched {} articles for processing", documents.len());
            match self.indexer.index_documents(&documents).await {
                Ok(report) => {
                    info!("Added {} chunks to vector index", report.inserted);
                    if report.inserted > 0 {
                        self.update_state(|s| s.last_refresh_at = Some(Utc::now()));
                    }
                }
                Err(e) if e.is_unavailable() => {
                    warn!("Vector index unavailable during initialization: {e}");
                }
                Err(e) => {
                    error!("Error initializing RAG pipeline: {e}");
                    let existing = self.index.size().await;
                    if existing == 0 {
                        return Err(e);
                    }
                    info!("Found existing data in index with {existing} chunks");
                }
            }
        }

        self.update_state(|s| s.initialized = true);
        let status = self.status().await;
        info!("RAG pipeline initialization complete ({status:?})");
        Ok(status)
    }

    /// Ingests a smaller batch of fresh documents on top of the existing
    /// chunks. Returns whether anything was added.
    pub async fn refresh(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        info!("Refreshing news articles");

        let documents = self.source.fetch_documents(self.options.refresh_limit).await;
        if documents.is_empty() {
            warn!("No new articles fetched during refresh");
            return false;
        }

        match self.indexer.index_documents(&documents).await {
            Ok(report) => {
                info!("Added {} new chunks to vector index", report.inserted);
                self.update_state(|s| s.last_refresh_at = Some(Utc::now()));
                true
            }
            Err(e) => {
                error!("Error refreshing articles: {e}");
                false
            }
        }
    }

    /// Whether the last successful refresh is at least `refresh_min_age` old.
    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        let min_age = TimeDelta::from_std(self.options.refresh_min_age)
            .unwrap_or_else(|_| TimeDelta::days(36_500));
        match self.state().last_refresh_at {
            None => true,
            Some(last) => now.signed_duration_since(last) >= min_age,
        }
    }

    /// Checks every `refresh_check_interval` and refreshes when due, until
    /// `cancel` fires.
    pub fn spawn_refresh_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pipeline.options.refresh_check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Refresh loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if pipeline.refresh_due(Utc::now()) {
                            info!("Starting scheduled article refresh");
                            if !pipeline.refresh().await {
                                warn!("Scheduled article refresh failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Answers `query` as a lazy token stream. The stream always yields at
    /// least one token; failures become a single explanatory message.
    pub fn answer(self: &Arc<Self>, query: String, history: Vec<Message>) -> TokenStream {
        let pipeline = Arc::clone(self);
        stream::once(async move { pipeline.prepare(query, history).await })
            .flatten()
            .boxed()
    }

    async fn prepare(&self, query: String, history: Vec<Message>) -> TokenStream {
        if !self.state().initialized {
            if let Err(e) = self.initialize().await {
                error!("Error initializing RAG pipeline on demand: {e}");
                return single(UNAVAILABLE_MESSAGE);
            }
        }

        let embedding = match self.embedder.embed(&query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                warn!("Empty query embedding");
                return single(QUERY_FAILED_MESSAGE);
            }
            Err(e) => {
                warn!("Query embedding failed: {e}");
                return single(QUERY_FAILED_MESSAGE);
            }
        };

        let results = match self.index.search(&embedding, self.options.top_k).await {
            Ok(results) => results,
            Err(e) => {
                error!("Error generating response: {e}");
                return single(answer_error_message(&e));
            }
        };

        if is_degraded(&results, &query) {
            warn!("Knowledge base degraded, suppressing answer");
            return single(DEGRADED_MESSAGE);
        }

        let context = build_context(&results);
        let start = history.len().saturating_sub(self.options.history_window);
        self.generator.stream(&query, &context, &history[start..])
    }
}
