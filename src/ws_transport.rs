//! JSON-over-WebSocket feed transport.
//!
//! Every request is a text frame carrying the serialized [`FeedRequest`] plus
//! an `id`. The server answers with `{"id": .., "ok": true, "result": ..}` or
//! `{"id": .., "ok": false, "error": ".."}`. Frames for other ids and
//! unsolicited pushes are ignored.

use crate::connection::{FeedRequest, FeedTransport};
use crate::error::FeedError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Answer to a correlated request. A rejection is the server speaking;
/// socket failures never produce one.
#[derive(Debug)]
enum Reply {
    Accepted(Value),
    Rejected(String),
}

pub struct WsTransport {
    url: String,
    stream: Option<WsStream>,
    next_id: u64,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            next_id: 1,
        }
    }

    /// Sends `body` and waits for the reply carrying the same id. Any socket
    /// failure drops the stream so the next `open` starts clean.
    async fn call(&mut self, body: Value) -> Result<Reply, FeedError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut envelope = body;
        if let Value::Object(map) = &mut envelope {
            map.insert("id".to_string(), json!(id));
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Transport("websocket not open".to_string()))?;

        let outcome = exchange(stream, id, envelope).await;
        if outcome.is_err() {
            self.stream = None;
        }
        outcome
    }
}

async fn exchange(stream: &mut WsStream, id: u64, envelope: Value) -> Result<Reply, FeedError> {
    stream
        .send(Message::Text(envelope.to_string()))
        .await
        .map_err(|e| FeedError::Transport(e.to_string()))?;

    while let Some(frame) = stream.next().await {
        match frame.map_err(|e| FeedError::Transport(e.to_string()))? {
            Message::Text(text) => {
                let reply: Value = match serde_json::from_str(&text) {
                    Ok(reply) => reply,
                    Err(_) => {
                        debug!("Ignoring non-JSON frame ({} bytes)", text.len());
                        continue;
                    }
                };
                if reply.get("id").and_then(Value::as_u64) != Some(id) {
                    continue;
                }
                if reply.get("ok").and_then(Value::as_bool).unwrap_or(false) {
                    return Ok(Reply::Accepted(
                        reply.get("result").cloned().unwrap_or(Value::Null),
                    ));
                }
                let reason = reply
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("request rejected")
                    .to_string();
                return Ok(Reply::Rejected(reason));
            }
            Message::Ping(payload) => {
                stream
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| FeedError::Transport(e.to_string()))?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(FeedError::Transport("websocket closed by peer".to_string()))
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn open(&mut self, session_token: &str) -> Result<(), FeedError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        self.stream = Some(stream);
        info!("WebSocket open to {}", self.url);

        match self.call(json!({ "action": "auth", "session": session_token })).await? {
            Reply::Accepted(_) => Ok(()),
            Reply::Rejected(reason) => {
                self.close().await;
                Err(FeedError::Auth(reason))
            }
        }
    }

    async fn request(&mut self, request: &FeedRequest) -> Result<String, FeedError> {
        let body = serde_json::to_value(request).map_err(|e| FeedError::Parse(e.to_string()))?;
        match self.call(body).await? {
            Reply::Accepted(result) => Ok(result.to_string()),
            Reply::Rejected(reason) => Err(FeedError::Transport(reason)),
        }
    }

    async fn ping(&mut self) -> Result<(), FeedError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Transport("websocket not open".to_string()))?;
        stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        while let Some(frame) = stream.next().await {
            match frame.map_err(|e| FeedError::Transport(e.to_string()))? {
                Message::Pong(_) => return Ok(()),
                Message::Ping(payload) => {
                    stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| FeedError::Transport(e.to_string()))?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.stream = None;
        Err(FeedError::Transport("websocket closed by peer".to_string()))
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
