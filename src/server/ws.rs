use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::ServerError;
use super::protocol::{TransportReceiver, TransportSender};

pub struct WsSender(pub SplitSink<WebSocket, WsMessage>);

pub struct WsReceiver(pub SplitStream<WebSocket>);

#[async_trait]
impl TransportSender for WsSender {
    async fn send(&mut self, text: String) -> Result<(), ServerError> {
        self.0
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))
    }
}

#[async_trait]
impl TransportReceiver for WsReceiver {
    async fn receive(&mut self) -> Option<String> {
        loop {
            match self.0.next().await? {
                Ok(WsMessage::Text(text)) => return Some(text),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(text),
                    Err(_) => continue,
                },
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                // Pings are answered by the socket itself
                Ok(_) => continue,
            }
        }
    }
}
