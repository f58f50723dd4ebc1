use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{error, info};

use super::{DocumentSource, IngestError, SourceDocument};

/// Reads a JSON array of previously saved articles.
pub struct JsonFileSource {
    path: PathBuf,
    min_content_chars: usize,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>, min_content_chars: usize) -> Self {
        Self {
            path: path.into(),
            min_content_chars,
        }
    }

    async fn load(&self) -> Result<Vec<SourceDocument>, IngestError> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Writes `documents` as a JSON array that [`JsonFileSource`] can read back.
pub async fn save_documents(path: &Path, documents: &[SourceDocument]) -> Result<(), IngestError> {
    let data = serde_json::to_string_pretty(documents)?;
    tokio::fs::write(path, data).await?;
    Ok(())
}

#[async_trait]
impl DocumentSource for JsonFileSource {
    async fn fetch_documents(&self, limit: usize) -> Vec<SourceDocument> {
        match self.load().await {
            Ok(articles) => {
                let articles: Vec<SourceDocument> = articles
                    .into_iter()
                    .filter(|a| a.content.chars().count() > self.min_content_chars)
                    .take(limit)
                    .collect();
                info!(
                    "Loaded {} articles from {}",
                    articles.len(),
                    self.path.display()
                );
                articles
            }
            Err(e) => {
                error!("Could not load articles from {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loads_filters_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("articles.json");
        let long = "word ".repeat(40);
        let json = serde_json::json!([
            {"title": "A", "url": "https://a", "published_date": "Mon", "content": long},
            {"title": "Short", "url": "https://s", "content": "too short"},
            {"title": "B", "url": "https://b", "content": long},
            {"title": "C", "url": "https://c", "content": long}
        ]);
        std::fs::write(&path, json.to_string()).unwrap();

        let source = JsonFileSource::new(&path, 100);
        let docs = source.fetch_documents(2).await;
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(docs[0].published_date.as_deref(), Some("Mon"));
        assert!(docs[1].published_date.is_none());
    }

    #[tokio::test]
    async fn test_saved_documents_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let docs = vec![
            SourceDocument {
                title: "Monsoon arrives early".to_string(),
                url: "https://news.example/monsoon".to_string(),
                published_date: Some("Mon, 02 Jun 2025 10:00:00 +0530".to_string()),
                content: "Heavy rain reached the coast ahead of schedule. ".repeat(5),
            },
            SourceDocument {
                title: "Budget session".to_string(),
                url: "https://news.example/budget".to_string(),
                published_date: None,
                content: "Parliament opened the budget session with a long debate. ".repeat(5),
            },
        ];

        save_documents(&path, &docs).await.unwrap();
        let loaded = JsonFileSource::new(&path, 100).fetch_documents(10).await;
        assert_eq!(loaded, docs);
    }

    #[tokio::test]
    async fn test_save_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/saved.json");
        assert!(matches!(
            save_documents(&path, &[]).await,
            Err(IngestError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_yields_nothing() {
        let source = JsonFileSource::new("/nonexistent/articles.json", 100);
        assert!(source.fetch_documents(10).await.is_empty());
    }
}
