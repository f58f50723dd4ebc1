//! Client for an OpenAI/Groq-compatible chat-completions endpoint with
//! server-sent-event streaming.
use std::time::Duration;

use bytes::Bytes;
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{Generator, SYSTEM_PROMPT, TokenStream, user_prompt};
use crate::config::GenerationConfig;
use crate::session::Message;

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded line of the event stream.
#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
    Malformed(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return SseLine::Skip;
    }
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(content) if !content.is_empty() => SseLine::Token(content),
            _ => SseLine::Skip,
        },
        Err(e) => {
            error!("Error parsing streaming response: {e}");
            SseLine::Malformed(format!("\nError parsing response: {e}"))
        }
    }
}

fn build_messages(query: &str, context: &str, history: &[Message]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: SYSTEM_PROMPT.to_string(),
    });
    for msg in history {
        messages.push(ChatMessage {
            role: msg.role.as_str(),
            content: msg.content.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: user_prompt(context, query),
    });
    messages
}

enum SseState {
    Pending(RequestBuilder),
    Reading {
        body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
        buffer: Vec<u8>,
    },
    Done,
}

/// Drives the request/stream state machine until the next token.
async fn advance(mut state: SseState) -> Option<(String, SseState)> {
    loop {
        state = match state {
            SseState::Done => return None,
            SseState::Pending(request) => match request.send().await {
                Ok(response) if response.status().is_success() => SseState::Reading {
                    body: Some(response.bytes_stream().boxed()),
                    buffer: Vec::new(),
                },
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    error!("Error from generation API: {status} - {body}");
                    return Some((
                        format!("Error generating response: {}", status.as_u16()),
                        SseState::Done,
                    ));
                }
                Err(e) => {
                    error!("Error generating streaming response: {e}");
                    return Some((format!("Error generating response: {e}"), SseState::Done));
                }
            },
            SseState::Reading { body, mut buffer } => {
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
                        SseLine::Token(token) => {
                            return Some((token, SseState::Reading { body, buffer }));
                        }
                        SseLine::Done => return None,
                        SseLine::Malformed(msg) => return Some((msg, SseState::Done)),
                        SseLine::Skip => SseState::Reading { body, buffer },
                    }
                } else {
                    let Some(mut stream) = body else {
                        return None;
                    };
                    match stream.next().await {
                        Some(Ok(bytes)) => {
                            buffer.extend_from_slice(&bytes);
                            SseState::Reading {
                                body: Some(stream),
                                buffer,
                            }
                        }
                        Some(Err(e)) => {
                            error!("Generation stream interrupted: {e}");
                            return Some((
                                format!("Error generating response: {e}"),
                                SseState::Done,
                            ));
                        }
                        None if buffer.is_empty() => return None,
                        None => {
                            // Flush a final line that lacked its newline
                            buffer.push(b'\n');
                            SseState::Reading { body: None, buffer }
                        }
                    }
                }
            }
        };
    }
}

pub struct HttpGenerator {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        info!("Using generation API {} ({})", config.api_url, config.model);

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl Generator for HttpGenerator {
    fn stream(&self, query: &str, context: &str, history: &[Message]) -> TokenStream {
        let request = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: build_messages(query, context, history),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stream: true,
            });

        stream::unfold(SseState::Pending(request), advance).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn test_parse_token_line() {
        let line = r#"data: {"id":"x","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Token("Hello".to_string()));
    }

    #[test]
    fn test_parse_role_only_delta_is_skipped() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Skip);
        assert_eq!(parse_sse_line(r#"data: {"choices":[]}"#), SseLine::Skip);
    }

    #[test]
    fn test_parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message"), SseLine::Skip);
    }

    #[test]
    fn test_parse_malformed_json() {
        match parse_sse_line("data: {not json") {
            SseLine::Malformed(msg) => assert!(msg.starts_with("\nError parsing response: ")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_build_messages_layout() {
        let history = vec![Message::user("earlier q"), Message::assistant("earlier a")];
        let messages = build_messages("what happened?", "CTX", &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
        assert_eq!(messages[1].role, Role::User.as_str());
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(
            messages[3].content,
            "Context: CTX\n\nQuestion: what happened?\n\nPlease answer the question based on the context provided."
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_single_error_token() {
        let config = GenerationConfig {
            api_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            timeout_secs: 2,
            connect_timeout_secs: 1,
            ..GenerationConfig::default()
        };
        let generator = HttpGenerator::new(&config, "test-key".to_string()).unwrap();

        let tokens: Vec<String> = generator.stream("q", "ctx", &[]).collect().await;
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].starts_with("Error generating response"));
    }
}
