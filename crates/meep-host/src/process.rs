//! Spawning and killing the simulator.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::SessionError;

/// Program plus arguments to launch per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// The three pipes, handed out once so each has exactly one reader/writer.
pub struct ProcessIo {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A running simulator. Leads its own process group so `terminate` also
/// takes down anything it forked.
pub struct MeepProcess {
    child: Child,
    pid: Option<u32>,
    terminated: bool,
}

impl MeepProcess {
    pub fn spawn(command: &CommandSpec, dir: &Path) -> Result<(Self, ProcessIo), SessionError> {
        let spawn_error = |source: io::Error| SessionError::ProcessSpawn {
            command: command.program.clone(),
            source,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let pid = child.id();
        let io = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => ProcessIo {
                stdin,
                stdout,
                stderr,
            },
            _ => {
                return Err(spawn_error(io::Error::new(
                    io::ErrorKind::Other,
                    "child pipes were not captured",
                )))
            }
        };

        debug!(pid, program = %command.program, dir = %dir.display(), "simulator spawned");
        Ok((
            Self {
                child,
                pid,
                terminated: false,
            },
            io,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// SIGKILL the whole group, then reap. Runs once; later calls return
    /// immediately. Applies even when the process already exited on its own.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        kill_group(self.pid);
        if let Err(err) = self.child.start_kill() {
            // Already reaped.
            debug!(pid = self.pid, %err, "start_kill skipped");
        }
        match self.child.wait().await {
            Ok(status) => debug!(pid = self.pid, %status, "simulator terminated"),
            Err(err) => warn!(pid = self.pid, %err, "failed to reap simulator"),
        }
    }
}

impl Drop for MeepProcess {
    fn drop(&mut self) {
        if !self.terminated {
            // kill_on_drop covers the leader; this covers its children.
            kill_group(self.pid);
        }
    }
}

fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid, %err, "killpg failed"),
    }
}
