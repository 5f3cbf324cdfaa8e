//! Deadline and forced termination for one session's task group.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::process::MeepProcess;
use crate::protocol::ClientTx;

pub type TaskResult = Result<(), SessionError>;

/// How long the timeout notice may wait for room in the outbound queue.
const NOTICE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Every task finished and the simulator exited.
    Completed,
    /// A task failed or panicked.
    Aborted,
    /// The budget ran out first.
    TimedOut,
    /// The session was torn down from outside (client disconnected).
    Cancelled,
}

/// Owns the simulator and the tasks feeding off it. Whatever happens in
/// [`Supervisor::run`], the simulator is killed before it returns.
pub struct Supervisor {
    process: MeepProcess,
    tasks: JoinSet<TaskResult>,
    budget: Duration,
    client: ClientTx,
}

impl Supervisor {
    pub fn new(process: MeepProcess, budget: Duration, client: ClientTx) -> Self {
        Self {
            process,
            tasks: JoinSet::new(),
            budget,
            client,
        }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub async fn run(mut self, cancel: oneshot::Receiver<()>) -> SupervisorOutcome {
        let deadline = Instant::now() + self.budget;
        let pid = self.process.pid();

        let outcome = tokio::select! {
            outcome = drain(&mut self.tasks, &mut self.process) => outcome,
            _ = tokio::time::sleep_until(deadline) => SupervisorOutcome::TimedOut,
            _ = cancel => SupervisorOutcome::Cancelled,
        };

        let overran = outcome == SupervisorOutcome::TimedOut && self.process.is_running();
        if overran {
            warn!(pid, error = %SessionError::TimeoutExceeded(self.budget), "killing simulator");
        }

        self.tasks.shutdown().await;
        self.process.terminate().await;

        if overran {
            let notice = format!(
                "Timeout, meep running for more than {}",
                describe_budget(self.budget)
            );
            // a client that stopped reading can hold the outbound queue full
            if tokio::time::timeout(NOTICE_GRACE, self.client.fail(notice))
                .await
                .is_err()
            {
                debug!(pid, "timeout notice dropped, client not reading");
            }
        }
        debug!(pid, ?outcome, "session supervisor done");
        outcome
    }
}

async fn drain(tasks: &mut JoinSet<TaskResult>, process: &mut MeepProcess) -> SupervisorOutcome {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(SessionError::Transport)) => {
                debug!("client went away mid-session");
                return SupervisorOutcome::Aborted;
            }
            Ok(Err(err)) => {
                warn!(%err, "session task failed");
                return SupervisorOutcome::Aborted;
            }
            Err(err) if err.is_panic() => {
                warn!(%err, "session task panicked");
                return SupervisorOutcome::Aborted;
            }
            Err(_) => {}
        }
    }
    if let Err(err) = process.wait().await {
        warn!(%err, "failed waiting for simulator");
    }
    SupervisorOutcome::Completed
}

/// "15 minutes", "1 minute", "90 seconds".
pub fn describe_budget(budget: Duration) -> String {
    let secs = budget.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s >= 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}
