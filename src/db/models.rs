use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRow {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub published_date: Option<String>,
    pub indexed_at: DateTime<Utc>,
}
