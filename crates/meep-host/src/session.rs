//! One WebSocket connection driving one simulator run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::decode::{decode_frames, GridReader};
use crate::encode::stream_frames;
use crate::error::SessionError;
use crate::palette::Palette;
use crate::process::{MeepProcess, ProcessIo};
use crate::protocol::{
    pump, ClientTx, MSG_DECODE_FAILED, MSG_STARTED, MSG_START_FAILED, MSG_STDIN_FAILED,
};
use crate::queue::FrameQueue;
use crate::relay::{relay_errors, relay_output, StdinWriter};
use crate::server::AppState;
use crate::supervisor::{Supervisor, TaskResult};
use crate::workspace::{Workspace, WORKSPACE_PREFIX};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Decode everything the relay announces, then stream it. Frames are only
/// sent once the last one is decoded because the peak has to be final.
pub async fn run_pipeline(
    queue: Arc<FrameQueue>,
    reader: Arc<dyn GridReader>,
    palette: &'static Palette,
    client: ClientTx,
) -> TaskResult {
    let frames = match decode_frames(&queue, reader).await {
        Ok(frames) => frames,
        Err(err) => {
            warn!(%err, "failed to decode result file");
            client.fail(MSG_DECODE_FAILED).await;
            return Err(SessionError::Decode(err));
        }
    };
    info!(
        frames = frames.len(),
        shape = ?frames.shape(),
        peak = frames.peak(),
        "streaming results"
    );
    stream_frames(&frames, palette, &client).await
}

fn start(state: &AppState) -> Result<(Workspace, MeepProcess, ProcessIo), SessionError> {
    let workspace = Workspace::create(WORKSPACE_PREFIX)?;
    let (process, io) = MeepProcess::spawn(&state.config.command, workspace.path())?;
    Ok((workspace, process, io))
}

pub async fn run(socket: WebSocket, state: AppState) {
    let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
    drive(socket, state)
        .instrument(info_span!("session", id))
        .await
}

async fn drive(socket: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (client, outbound) = ClientTx::channel();
    let writer = tokio::spawn(pump(outbound, ws_tx));

    let (mut workspace, process, io) = match start(&state) {
        Ok(started) => started,
        Err(err) => {
            warn!(%err, "session failed to start");
            client.fail(MSG_START_FAILED).await;
            drop(client);
            let _ = writer.await;
            return;
        }
    };
    info!(pid = process.pid(), workspace = %workspace.path().display(), "session started");
    let _ = client.succ(MSG_STARTED).await;

    let ProcessIo {
        stdin,
        stdout,
        stderr,
    } = io;
    let queue = Arc::new(FrameQueue::new());
    let mut supervisor = Supervisor::new(process, state.config.session_timeout, client.clone());

    supervisor.spawn(
        {
            let dir = workspace.path().to_path_buf();
            let marker = state.config.marker.clone();
            let queue = Arc::clone(&queue);
            let client = client.clone();
            async move {
                relay_output(stdout, dir, marker, queue, client).await;
                Ok(())
            }
        }
        .in_current_span(),
    );
    supervisor.spawn(
        {
            let forward = state.config.forward_stderr.then(|| client.clone());
            async move {
                relay_errors(stderr, forward).await;
                Ok(())
            }
        }
        .in_current_span(),
    );
    supervisor.spawn(
        run_pipeline(
            Arc::clone(&queue),
            Arc::clone(&state.reader),
            state.palette,
            client.clone(),
        )
        .in_current_span(),
    );

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let supervised = tokio::spawn(supervisor.run(cancel_rx).in_current_span());

    let mut stdin = StdinWriter::new(stdin);
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(err) = stdin.forward(&text).await {
                    debug!(%err, "stdin write failed");
                    client.fail(MSG_STDIN_FAILED).await;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    debug!("client disconnected, tearing down");
    drop(cancel_tx);
    match supervised.await {
        Ok(outcome) => info!(?outcome, "session closed"),
        Err(err) => warn!(%err, "supervisor task failed"),
    }
    drop(stdin);
    workspace.close();
    // nobody left to read what is still queued
    writer.abort();
}
