//! Framed turn protocol over a bidirectional text channel.
//!
//! Each inbound message starts a turn that emits `status(processing)`, then
//! `stream` frames in generation order, then either `end` or a single
//! `error` frame. Turns of one session run strictly one after another.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ServerError;
use crate::rag::RagPipeline;
use crate::session::{Message, SessionStore};

/// Buffered tokens between the generation task and the sender.
const TOKEN_BUFFER: usize = 32;
const INBOX_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Status,
    Stream,
    Error,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub content: String,
}

impl Frame {
    pub fn processing() -> Self {
        Self {
            kind: FrameKind::Status,
            content: "processing".to_string(),
        }
    }

    pub fn stream(token: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Stream,
            content: token.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Error,
            content: message.into(),
        }
    }

    pub fn end() -> Self {
        Self {
            kind: FrameKind::End,
            content: String::new(),
        }
    }

    pub fn to_json(&self) -> String {
        // Two plain string fields cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Client message. `timestamp` is kept when it parses as RFC 3339.
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Inbound {
    fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

#[async_trait]
pub trait TransportSender: Send {
    async fn send(&mut self, text: String) -> Result<(), ServerError>;
}

#[async_trait]
pub trait TransportReceiver: Send {
    /// Next text message, `None` once the peer is gone.
    async fn receive(&mut self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    Disconnected,
}

async fn send_frame<S: TransportSender + ?Sized>(sender: &mut S, frame: Frame) -> bool {
    sender.send(frame.to_json()).await.is_ok()
}

fn preview(text: &str) -> String {
    if text.chars().count() > 30 {
        format!("{}...", text.chars().take(30).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Runs the protocol for one connection until the peer disconnects.
pub async fn serve_session<S, R>(
    session_id: String,
    sessions: Arc<SessionStore>,
    pipeline: Arc<RagPipeline>,
    mut sender: S,
    mut receiver: R,
) where
    S: TransportSender,
    R: TransportReceiver + 'static,
{
    info!("Connection established for session: {session_id}");

    if !sessions.exists(&session_id).await
        && !sessions.create(&session_id).await
        && !sessions.exists(&session_id).await
    {
        warn!("Failed to create session during connection: {session_id}");
        send_frame(
            &mut sender,
            Frame::error("Failed to create chat session. Please refresh the page."),
        )
        .await;
        return;
    }

    // The reader runs on its own task so a disconnect is noticed mid-turn
    let disconnected = CancellationToken::new();
    let (inbox_tx, mut inbox) = mpsc::channel::<String>(INBOX_BUFFER);
    let reader = tokio::spawn({
        let disconnected = disconnected.clone();
        async move {
            while let Some(text) = receiver.receive().await {
                if inbox_tx.send(text).await.is_err() {
                    break;
                }
            }
            disconnected.cancel();
        }
    });

    loop {
        let text = tokio::select! {
            biased;
            _ = disconnected.cancelled() => break,
            text = inbox.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let inbound: Inbound = match serde_json::from_str(&text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Malformed message in session {session_id}: {e}");
                if !send_frame(&mut sender, Frame::error(format!("Invalid message: {e}"))).await {
                    break;
                }
                continue;
            }
        };

        let outcome = run_turn(
            &session_id,
            inbound,
            &sessions,
            &pipeline,
            &mut sender,
            &disconnected,
        )
        .await;
        if outcome == TurnOutcome::Disconnected {
            break;
        }
    }

    reader.abort();
    info!("Connection closed for session: {session_id}");
}

/// One request/response turn. The assistant reply accumulated so far is
/// stored even when the peer disconnects or generation fails.
pub async fn run_turn<S: TransportSender + ?Sized>(
    session_id: &str,
    inbound: Inbound,
    sessions: &SessionStore,
    pipeline: &Arc<RagPipeline>,
    sender: &mut S,
    disconnected: &CancellationToken,
) -> TurnOutcome {
    info!(
        "Received message in session {session_id}: {}",
        preview(&inbound.message)
    );

    let timestamp = inbound.parsed_timestamp();
    sessions
        .append(
            session_id,
            Message::user(inbound.message.clone()).with_timestamp(timestamp),
        )
        .await;
    let history = sessions.history(session_id).await.unwrap_or_default();

    let mut reply = String::new();
    let mut outcome = TurnOutcome::Completed;

    if send_frame(sender, Frame::processing()).await {
        let cancel = disconnected.child_token();
        let (tx, mut rx) = mpsc::channel::<String>(TOKEN_BUFFER);
        let mut tokens = pipeline.answer(inbound.message, history);

        let producer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                loop {
                    let token = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        token = tokens.next() => match token {
                            Some(token) => token,
                            None => break,
                        },
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = tx.send(token) => if sent.is_err() { break },
                    }
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                _ = disconnected.cancelled() => {
                    outcome = TurnOutcome::Disconnected;
                    break;
                }
                token = rx.recv() => match token {
                    Some(token) => {
                        // Only tokens the peer actually received become history
                        if !send_frame(sender, Frame::stream(token.as_str())).await {
                            outcome = TurnOutcome::Disconnected;
                            break;
                        }
                        reply.push_str(&token);
                    }
                    None => break,
                },
            }
        }

        cancel.cancel();
        drop(rx);

        if let Err(e) = producer.await {
            if e.is_panic() {
                let message = format!("Error generating response: {e}");
                error!("{message}");
                if outcome == TurnOutcome::Completed {
                    outcome = TurnOutcome::Failed;
                    if !send_frame(sender, Frame::error(message.clone())).await {
                        outcome = TurnOutcome::Disconnected;
                    }
                }
                reply = message;
            }
        }
    } else {
        outcome = TurnOutcome::Disconnected;
    }

    debug!("Reply in session {session_id}: {}", preview(&reply));
    sessions
        .append(session_id, Message::assistant(reply))
        .await;

    if outcome == TurnOutcome::Completed && !send_frame(sender, Frame::end()).await {
        outcome = TurnOutcome::Disconnected;
    }

    outcome
}
