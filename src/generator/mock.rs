use std::time::Duration;

use futures::{StreamExt, stream};

use super::{Generator, TokenStream};
use crate::session::Message;

const SIMULATED_NOTE: &str =
    "\n\nPlease note this is a simulated response as the Groq API key is not configured.";

/// Simulated generator: echoes the query and a context preview in
/// three-word chunks.
pub struct MockGenerator {
    delay: Duration,
}

impl MockGenerator {
    /// `delay` is slept before each chunk.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

fn context_preview(context: &str) -> String {
    if context.chars().count() > 50 {
        let head: String = context.chars().take(50).collect();
        format!("{head}...")
    } else {
        context.to_string()
    }
}

fn simulated_chunks(query: &str, context: &str) -> Vec<String> {
    let parts = [
        format!("Here's what I found about '{query}':\n\n"),
        "Based on the news articles, ".to_string(),
        context_preview(context),
        SIMULATED_NOTE.to_string(),
    ];

    let mut chunks = Vec::new();
    for part in &parts {
        let words: Vec<&str> = part.split_whitespace().collect();
        for group in words.chunks(3) {
            chunks.push(format!("{} ", group.join(" ")));
        }
    }
    chunks
}

impl Generator for MockGenerator {
    fn stream(&self, query: &str, context: &str, _history: &[Message]) -> TokenStream {
        let delay = self.delay;
        stream::iter(simulated_chunks(query, context))
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                chunk
            })
            .boxed()
    }
}
