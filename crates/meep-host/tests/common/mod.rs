//! Reusable test harness for meep-host integration tests.
//!
//! Runs the router in-process on an ephemeral port, with a shell script
//! standing in for meep and a plain-text grid reader standing in for HDF5.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use meep_host::decode::{Grid, GridReader};
use meep_host::error::DecodeError;
use meep_host::palette::Palette;
use meep_host::process::CommandSpec;
use meep_host::{serve, AppState, SessionConfig};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

// ── Doubles ─────────────────────────────────────────────────────────

/// Whitespace-separated rows of numbers, one grid row per line.
pub struct TextGridReader;

impl GridReader for TextGridReader {
    fn read(&self, path: &Path) -> Result<Grid, DecodeError> {
        let text = fs::read_to_string(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut rows = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let row = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DecodeError::Dataset {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            rows.push(row);
        }
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        Grid::new(rows.concat(), height, width)
    }
}

/// Five entries, red channel 0, 10, 20, 30, 40. Index 2 is the midpoint.
pub fn test_palette() -> &'static Palette {
    static PALETTE: OnceLock<Palette> = OnceLock::new();
    PALETTE.get_or_init(|| {
        Palette::from_colors((0..5u8).map(|i| [i * 10, 0, 0, 255]).collect())
            .expect("five colours")
    })
}

pub fn color(index: u8) -> [u8; 4] {
    [index * 10, 0, 0, 255]
}

/// Session config running `script` under /bin/sh in the workspace.
pub fn sh(script: &str) -> SessionConfig {
    SessionConfig::new(CommandSpec::new("/bin/sh").arg("-c").arg(script))
}

pub fn state(config: SessionConfig) -> AppState {
    AppState::new(config, test_palette(), Arc::new(TextGridReader))
}

// ── ServerHandle ────────────────────────────────────────────────────

/// In-process server. Stops on drop.
pub struct ServerHandle {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn start_server(config: SessionConfig) -> ServerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let state = state(config);
    let task = tokio::spawn(async move {
        let _ = serve(listener, state).await;
    });
    ServerHandle { addr, task }
}

// ── WsClient ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Text(String),
    Binary(Vec<u8>),
}

impl Received {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Received::Text(t) => Some(t),
            Received::Binary(_) => None,
        }
    }
}

pub struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(server: &ServerHandle) -> Self {
        let url = format!("ws://{}/execute", server.addr);
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        Self { ws }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send text");
    }

    /// Next text or binary message. None on close or timeout.
    pub async fn recv(&mut self) -> Option<Received> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .ok()??;
            match next.ok()? {
                Message::Text(t) => return Some(Received::Text(t)),
                Message::Binary(b) => return Some(Received::Binary(b)),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Every message up to and including `end`. Panics if `end` never comes.
    pub async fn collect_until_end(&mut self) -> Vec<Received> {
        let mut seen = Vec::new();
        loop {
            match self.recv().await {
                Some(msg) => {
                    let done = msg.as_text() == Some("end");
                    seen.push(msg);
                    if done {
                        return seen;
                    }
                }
                None => panic!("stream closed before end, got {seen:?}"),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Text messages only, in arrival order.
pub fn texts(messages: &[Received]) -> Vec<&str> {
    messages.iter().filter_map(Received::as_text).collect()
}

pub fn binaries(messages: &[Received]) -> Vec<&[u8]> {
    messages
        .iter()
        .filter_map(|m| match m {
            Received::Binary(b) => Some(b.as_slice()),
            Received::Text(_) => None,
        })
        .collect()
}

pub fn pixels(colors: &[[u8; 4]]) -> Vec<u8> {
    colors.concat()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
