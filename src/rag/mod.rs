//! Retrieval orchestration: ingestion into the index, context assembly and
//! delegation to the generator.
pub mod pipeline;

use serde::Serialize;

use crate::index::SearchResult;

pub use pipeline::{PipelineOptions, RagPipeline};

pub const UNAVAILABLE_MESSAGE: &str =
    "I'm having trouble accessing news information right now. Please try again later.";

pub const QUERY_FAILED_MESSAGE: &str =
    "I'm having trouble processing your query. Please try again later.";

pub const DEGRADED_MESSAGE: &str = "I'm having trouble accessing my news database right now. I can still try to help with general questions, but I might not have the latest news information.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const UNKNOWN_TITLE: &str = "Unknown Article";

pub fn answer_error_message(err: &dyn std::fmt::Display) -> String {
    format!("I'm sorry, but I encountered an error while trying to answer your question: {err}")
}

/// Snapshot of the orchestrator's process-wide state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub initialized: bool,
    pub last_refresh_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Uninitialized,
    Ready,
    ReadyEmpty,
}

/// Joins result texts with their source titles, best match first.
pub fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| {
            let title = r
                .metadata
                .title
                .as_deref()
                .filter(|t| !t.is_empty())
                .unwrap_or(UNKNOWN_TITLE);
            format!("{}\nFrom: {title}", r.text)
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// No results at all, or only placeholders while the user asks about news.
pub fn is_degraded(results: &[SearchResult], query: &str) -> bool {
    results.is_empty()
        || (results.iter().all(SearchResult::is_degraded) && query.to_lowercase().contains("news"))
}
