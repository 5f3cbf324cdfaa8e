//! Messages sent to the browser client and the per-session writer.
//!
//! Text messages carry a tag prefix (`succ:`, `info:`, `error:`) or are the
//! bare terminal marker `end`. Binary messages are whole frames.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SessionError;

pub const MSG_STARTED: &str = "Sending data to server...";
pub const MSG_COMPLETED: &str = "Execution completed successfully";
pub const MSG_START_FAILED: &str = "Failed to start meep";
pub const MSG_STDIN_FAILED: &str = "Failed to send data to meep";
pub const MSG_DECODE_FAILED: &str = "Failed reading meep outputed data";
pub const END_MARKER: &str = "end";

/// Outgoing messages are queued here before the writer picks them up.
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Succ(String),
    Info(String),
    Error(String),
    End,
    Binary(Vec<u8>),
}

impl Outbound {
    pub fn is_end(&self) -> bool {
        matches!(self, Outbound::End)
    }

    /// Wire form of a text message; `None` for binary frames.
    pub fn text(&self) -> Option<String> {
        match self {
            Outbound::Succ(t) => Some(format!("succ:{t}")),
            Outbound::Info(t) => Some(format!("info:{t}")),
            Outbound::Error(t) => Some(format!("error:{t}")),
            Outbound::End => Some(END_MARKER.to_string()),
            Outbound::Binary(_) => None,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Outbound::Binary(bytes) => Message::Binary(bytes),
            other => Message::Text(other.text().unwrap_or_default()),
        }
    }
}

/// Cloneable send handle for one session. All sends funnel into a single
/// writer, so frames from different tasks never interleave.
#[derive(Debug, Clone)]
pub struct ClientTx {
    tx: mpsc::Sender<Outbound>,
}

impl ClientTx {
    pub fn channel() -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn send(&self, msg: Outbound) -> Result<(), SessionError> {
        self.tx.send(msg).await.map_err(|_| SessionError::Transport)
    }

    pub async fn succ(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Outbound::Succ(text.into())).await
    }

    pub async fn info(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Outbound::Info(text.into())).await
    }

    pub async fn error(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Outbound::Error(text.into())).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.send(Outbound::End).await
    }

    pub async fn binary(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        self.send(Outbound::Binary(frame)).await
    }

    /// `error:<text>` followed by `end`, ignoring a dead transport.
    pub async fn fail(&self, text: impl Into<String>) {
        if self.error(text).await.is_ok() {
            let _ = self.end().await;
        }
    }
}

/// Drain queued messages into the socket. Stops after `end` (nothing may
/// follow it), when every sender is gone, or on the first write failure.
pub async fn pump<S>(mut rx: mpsc::Receiver<Outbound>, mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let last = msg.is_end();
        if sink.send(msg.into_message()).await.is_err() {
            debug!("client write failed, writer stopping");
            return;
        }
        if last {
            break;
        }
    }
    let _ = sink.flush().await;
}
