//! Source documents for the index.
//!
//! A [`DocumentSource`] never fails past its boundary: problems are logged
//! and surface as fewer (or zero) documents.
pub mod file;
pub mod rss;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FeedConfig;

pub use file::{JsonFileSource, save_documents};
pub use rss::RssSource;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid RSS feed: {0}")]
    Feed(#[from] quick_xml::DeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid article file: {0}")]
    Json(#[from] serde_json::Error),
}

/// One article with its extracted body text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub published_date: Option<String>,
    pub content: String,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Up to `limit` documents; may return fewer, or none.
    async fn fetch_documents(&self, limit: usize) -> Vec<SourceDocument>;
}

/// The saved-article file when `articles_path` is set, the RSS feed otherwise.
pub fn from_config(config: &FeedConfig) -> Result<Arc<dyn DocumentSource>, IngestError> {
    match &config.articles_path {
        Some(path) => Ok(Arc::new(JsonFileSource::new(path, config.min_content_chars))),
        None => Ok(Arc::new(RssSource::new(config)?)),
    }
}
