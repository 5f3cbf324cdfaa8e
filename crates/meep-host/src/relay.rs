//! Readers and writers attached to the simulator's pipes.

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::protocol::ClientTx;
use crate::queue::{FrameQueue, ProducerGuard};
use crate::workspace::resolve_in;

/// Recognizes meep's "creating output file" log lines for one field
/// component (the infix, e.g. `ez-`).
#[derive(Debug, Clone)]
pub struct FileMarker {
    pattern: Regex,
}

impl FileMarker {
    pub fn new(infix: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r#"creating output file "(?P<filename>.*{}.*)""#,
            regex::escape(infix)
        ))?;
        Ok(Self { pattern })
    }

    /// File name announced on `line`, if any.
    pub fn file_name<'l>(&self, line: &'l str) -> Option<&'l str> {
        self.pattern
            .captures(line)
            .and_then(|c| c.name("filename"))
            .map(|m| m.as_str())
    }
}

/// Reads newline-terminated lines, replacing invalid UTF-8.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::with_capacity(256),
        }
    }

    /// `Ok(None)` at end of stream.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        let n = self.inner.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Copy stderr to the log. When a client is given, lines also go to it
/// as `error:` messages until the client goes away. Never touches the queue.
pub async fn relay_errors<R>(stderr: R, client: Option<ClientTx>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineReader::new(stderr);
    let mut client = client;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                warn!(target: "meep::stderr", "{line}");
                if let Some(tx) = &client {
                    if tx.error(line).await.is_err() {
                        client = None;
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "stderr relay stopped");
                break;
            }
        }
    }
}

/// Forward stdout to the client as `info:` lines and queue every announced
/// result file. However this returns, the queue's producer is finished.
pub async fn relay_output<R>(
    stdout: R,
    dir: PathBuf,
    marker: FileMarker,
    queue: Arc<FrameQueue>,
    client: ClientTx,
) where
    R: AsyncRead + Unpin,
{
    let _producer = ProducerGuard::new(&queue);
    let mut lines = LineReader::new(stdout);
    let mut announced = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "stdout relay stopped");
                break;
            }
        };

        if client.info(line.as_str()).await.is_err() {
            debug!("client gone, stdout relay stopping");
            break;
        }

        if let Some(name) = marker.file_name(&line) {
            let token = resolve_in(&dir, name);
            debug!(file = %token.display(), "result file announced");
            queue.offer(token);
            announced += 1;
        }
    }

    debug!(announced, "stdout closed");
}

/// Client text to simulator stdin.
pub struct StdinWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> StdinWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one client chunk and terminate it with a newline.
    pub async fn forward(&mut self, text: &str) -> std::io::Result<()> {
        self.inner.write_all(text.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }
}
