//! # newsrag: News RAG Chat Server
//!
//! Ingests news articles into a vector index and answers questions about
//! them over WebSocket sessions, streaming grounded replies token by token.
//!
//! ## Architecture
//!
//! - **[`config`]**: Configuration loading, validation, and defaults
//! - **[`db`]**: SQLite storage for sessions and persisted chunks
//! - **[`session`]**: Session store with shared-backend failover to memory
//! - **[`index`]**: Vector index with cosine top-k search
//! - **[`embedder`]**: Text embedding (HTTP provider or deterministic mock)
//! - **[`ingest`]**: Article sources: RSS feed scraping, saved JSON files
//! - **[`indexer`]**: Word-window chunking and embedding into the index
//! - **[`generator`]**: Streaming answer generation (SSE chat API or mock)
//! - **[`rag`]**: Retrieval orchestration, initialization, periodic refresh
//! - **[`server`]**: HTTP routes and the framed WebSocket turn protocol

pub mod config;
pub mod db;
pub mod embedder;
pub mod generator;
pub mod index;
pub mod indexer;
pub mod ingest;
pub mod rag;
pub mod server;
pub mod session;
