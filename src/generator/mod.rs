//! Streaming answer generation.
//!
//! A [`Generator`] turns a query, its retrieved context and recent history
//! into a lazy token stream. Streams never fail: on an internal error the
//! generator yields one explanatory token and ends.
pub mod http;
pub mod mock;

use std::sync::Arc;

use futures::stream::BoxStream;
use thiserror::Error;
use tracing::warn;

use crate::config::{GenerationConfig, api_key_from_env};
use crate::session::Message;

pub use http::HttpGenerator;
pub use mock::MockGenerator;

pub const SYSTEM_PROMPT: &str = "You are a helpful news assistant that provides accurate information based on the provided context. Only answer from the context provided, and if you don't know or can't find the answer in the context, say so.";

pub type TokenStream = BoxStream<'static, String>;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub trait Generator: Send + Sync {
    fn stream(&self, query: &str, context: &str, history: &[Message]) -> TokenStream;
}

/// Final user turn carrying the retrieved context.
pub fn user_prompt(context: &str, query: &str) -> String {
    format!(
        "Context: {context}\n\nQuestion: {query}\n\nPlease answer the question based on the context provided."
    )
}

/// The HTTP generator when its API key variable is set, the mock otherwise.
pub fn from_config(config: &GenerationConfig) -> Result<Arc<dyn Generator>, GeneratorError> {
    match api_key_from_env(&config.api_key_env) {
        Some(key) => Ok(Arc::new(HttpGenerator::new(config, key)?)),
        None => {
            warn!(
                "{} not set, answers will be simulated (not useful for production)",
                config.api_key_env
            );
            Ok(Arc::new(MockGenerator::default()))
        }
    }
}
