//! Document chunking and embedding into the vector index.
pub mod chunker;
pub mod core;

pub use chunker::split_words;
pub use self::core::{Indexer, IngestReport};
