use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::{DocumentSource, IngestError, SourceDocument, save_documents};
use crate::config::FeedConfig;

/// Article-body containers, most specific first.
const CONTENT_SELECTORS: [&str; 6] = [
    ".article-full-content",
    "article",
    ".story-content",
    "#content-body",
    ".entry-content",
    ".post-content",
];

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<FeedItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct FeedItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(rename = "pubDate", default)]
    pub_date: Option<String>,
}

fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, IngestError> {
    let rss: Rss = quick_xml::de::from_str(xml)?;
    Ok(rss
        .channel
        .items
        .into_iter()
        .filter(|item| item.link.as_deref().is_some_and(|l| !l.trim().is_empty()))
        .collect())
}

fn paragraph_text(root: scraper::ElementRef<'_>, p: &Selector) -> String {
    root.select(p)
        .map(|para| para.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Paragraph text of the first matching article container, or of every
/// `<p>` on the page when no container yields any.
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(p) = Selector::parse("p") else {
        return String::new();
    };

    for selector_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = paragraph_text(element, &p);
                if !text.is_empty() {
                    return text;
                }
                break;
            }
        }
    }

    paragraph_text(document.root_element(), &p)
}

/// RSS feed reader that fetches each linked article page concurrently.
pub struct RssSource {
    client: Client,
    rss_url: String,
    min_content_chars: usize,
    save_path: Option<PathBuf>,
}

impl RssSource {
    pub fn new(config: &FeedConfig) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; newsrag/0.3)")
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            rss_url: config.rss_url.clone(),
            min_content_chars: config.min_content_chars,
            save_path: config.save_path.as_ref().map(PathBuf::from),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, IngestError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    async fn fetch_feed(&self) -> Result<Vec<FeedItem>, IngestError> {
        info!("Fetching RSS feed from {}", self.rss_url);
        let xml = self.get_text(&self.rss_url).await?;
        let items = parse_feed(&xml)?;
        info!("Fetched {} articles from RSS feed", items.len());
        Ok(items)
    }

    /// Best effort: a failed write is logged and the fetch still succeeds.
    async fn save_snapshot(&self, documents: &[SourceDocument]) {
        let Some(path) = &self.save_path else {
            return;
        };
        if documents.is_empty() {
            return;
        }
        match save_documents(path, documents).await {
            Ok(()) => info!("Saved {} articles to {}", documents.len(), path.display()),
            Err(e) => warn!("Failed to save articles to {}: {e}", path.display()),
        }
    }

    async fn fetch_article(&self, item: FeedItem) -> Option<SourceDocument> {
        let url = item.link?;
        let html = match self.get_text(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Failed to fetch {url}: {e}");
                return None;
            }
        };

        let content = extract_article_text(&html);
        if content.chars().count() <= self.min_content_chars {
            warn!("Dropping {url}: only {} characters of content", content.len());
            return None;
        }

        Some(SourceDocument {
            title: item.title.map(|t| t.trim().to_string()).unwrap_or_default(),
            url,
            published_date: item.pub_date,
            content,
        })
    }
}

#[async_trait]
impl DocumentSource for RssSource {
    async fn fetch_documents(&self, limit: usize) -> Vec<SourceDocument> {
        let items = match self.fetch_feed().await {
            Ok(items) => items,
            Err(e) => {
                error!("Error fetching RSS feed: {e}");
                return Vec::new();
            }
        };

        let fetches = items
            .into_iter()
            .take(limit)
            .map(|item| self.fetch_article(item));
        let documents: Vec<SourceDocument> =
            join_all(fetches).await.into_iter().flatten().collect();

        info!("Fetched content for {} articles", documents.len());
        self.save_snapshot(&documents).await;
        documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>India News</title>
    <link>https://example.com</link>
    <description>Latest</description>
    <item>
      <title><![CDATA[Monsoon arrives early]]></title>
      <link>https://example.com/monsoon</link>
      <pubDate>Mon, 02 Jun 2025 10:00:00 +0530</pubDate>
      <description>Rain</description>
    </item>
    <item>
      <title>No link here</title>
    </item>
    <item>
      <title>Budget session</title>
      <link>https://example.com/budget</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_items() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("Monsoon arrives early"));
        assert_eq!(items[0].link.as_deref(), Some("https://example.com/monsoon"));
        assert_eq!(
            items[0].pub_date.as_deref(),
            Some("Mon, 02 Jun 2025 10:00:00 +0530")
        );
        assert!(items[1].pub_date.is_none());
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(parse_feed("not xml at all").is_err());
    }

    #[test]
    fn test_extract_prefers_article_container() {
        let html = r#"<html><body>
            <nav><p>Menu</p></nav>
            <div class="article-full-content"><p>First para.</p><p> Second para. </p></div>
            <footer><p>Copyright</p></footer>
        </body></html>"#;
        assert_eq!(extract_article_text(html), "First para. Second para.");
    }

    #[test]
    fn test_extract_falls_back_to_all_paragraphs() {
        let html = r#"<html><body>
            <article><div>No paragraphs inside</div></article>
            <p>Loose one.</p><p>Loose two.</p>
        </body></html>"#;
        assert_eq!(extract_article_text(html), "Loose one. Loose two.");
    }

    #[test]
    fn test_extract_empty_page() {
        assert_eq!(extract_article_text("<html><body></body></html>"), "");
    }

    fn snapshot_source(save_path: Option<PathBuf>) -> RssSource {
        let config = FeedConfig {
            save_path: save_path.map(|p| p.to_string_lossy().into_owned()),
            ..FeedConfig::default()
        };
        RssSource::new(&config).unwrap()
    }

    fn article(title: &str) -> SourceDocument {
        SourceDocument {
            title: title.to_string(),
            url: format!("https://news.example/{title}"),
            published_date: None,
            content: format!("{title} ").repeat(40),
        }
    }

    #[tokio::test]
    async fn test_snapshot_written_after_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let source = snapshot_source(Some(path.clone()));

        source.save_snapshot(&[]).await;
        assert!(!path.exists());

        let docs = vec![article("monsoon"), article("budget")];
        source.save_snapshot(&docs).await;
        let loaded = crate::ingest::JsonFileSource::new(&path, 100)
            .fetch_documents(10)
            .await;
        assert_eq!(loaded, docs);
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = snapshot_source(Some(dir.path().join("missing/snapshot.json")));
        source.save_snapshot(&[article("monsoon")]).await;

        let unset = snapshot_source(None);
        unset.save_snapshot(&[article("monsoon")]).await;
    }
}
