//! Synchronous variant: request body in, simulator stdout out.

use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::process::MeepProcess;
use crate::relay::{relay_errors, StdinWriter};
use crate::server::AppState;
use crate::workspace::{Workspace, WORKSPACE_PREFIX};

/// How long to wait for exit once stdout has closed.
const EXIT_GRACE: Duration = Duration::from_secs(60);

/// `POST /process`
pub async fn process(State(state): State<AppState>, body: String) -> Response {
    match run_batch(&state.config, &body).await {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            output,
        )
            .into_response(),
        Err(err) => {
            warn!(%err, "process request failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Feed `input` line by line, close stdin, collect stdout until it closes or
/// the budget runs out. The simulator and its workspace never outlive this.
pub async fn run_batch(config: &SessionConfig, input: &str) -> Result<String, SessionError> {
    let mut workspace = Workspace::create(WORKSPACE_PREFIX)?;
    let (mut process, io) = MeepProcess::spawn(&config.command, workspace.path())?;
    info!(pid = process.pid(), "batch run started");

    let errors = tokio::spawn(relay_errors(io.stderr, None));
    let mut stdout = io.stdout;
    let output = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.map(|_| buf)
    });

    let result = async {
        let mut stdin = StdinWriter::new(io.stdin);
        for line in input.lines() {
            stdin.forward(line).await.map_err(SessionError::Pipe)?;
        }
        drop(stdin);

        let bytes = tokio::time::timeout(config.process_timeout, output)
            .await
            .map_err(|_| SessionError::TimeoutExceeded(config.process_timeout))?
            .map_err(|e| SessionError::Pipe(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .map_err(SessionError::Pipe)?;
        let _ = tokio::time::timeout(EXIT_GRACE, process.wait()).await;
        let _ = tokio::time::timeout(EXIT_GRACE, errors).await;
        Ok::<_, SessionError>(String::from_utf8_lossy(&bytes).into_owned())
    }
    .await;

    process.terminate().await;
    workspace.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandSpec;

    fn sh(script: &str) -> SessionConfig {
        SessionConfig::new(CommandSpec::new("/bin/sh").arg("-c").arg(script))
    }

    #[tokio::test]
    async fn echoes_stdout() {
        let out = run_batch(&sh("cat; echo done"), "a\nb").await.unwrap();
        assert_eq!(out, "a\nb\ndone\n");
    }

    #[tokio::test]
    async fn runs_inside_fresh_workspace() {
        let out = run_batch(&sh("pwd; ls | wc -l"), "").await.unwrap();
        let mut lines = out.lines();
        let dir = lines.next().unwrap();
        assert!(dir.contains(WORKSPACE_PREFIX), "{dir}");
        assert_eq!(lines.next().unwrap().trim(), "0");
        assert!(!std::path::Path::new(dir).exists());
    }

    #[tokio::test]
    async fn times_out() {
        let mut cfg = sh("sleep 30");
        cfg.process_timeout = Duration::from_millis(200);
        let err = run_batch(&cfg, "").await.unwrap_err();
        assert!(matches!(err, SessionError::TimeoutExceeded(_)));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let cfg = SessionConfig::new(CommandSpec::new("__no_such_simulator__"));
        let err = run_batch(&cfg, "").await.unwrap_err();
        assert!(matches!(err, SessionError::ProcessSpawn { .. }));
    }
}
