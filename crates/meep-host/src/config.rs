//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::decode::DEFAULT_DATASET;
use crate::process::CommandSpec;
use crate::relay::FileMarker;

pub const DEFAULT_MARKER_INFIX: &str = "ez-";
pub const DEFAULT_PROGRAM: &str = "meep";

/// Serve meep over WebSocket, streaming field snapshots as palette frames.
///
/// Everything after `--` is the simulator command, e.g.
/// `meep-host -- mpirun -np 4 meep-mpi`.
#[derive(Debug, Parser)]
#[command(name = "meep-host", version)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "MEEP_HOST_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// PNG whose first row is the colour table. Defaults to the bundled one.
    #[arg(long, env = "MEEP_PALETTE")]
    pub palette: Option<PathBuf>,

    /// HDF5 dataset to read from each result file.
    #[arg(long, env = "MEEP_DATASET", default_value = DEFAULT_DATASET)]
    pub dataset: String,

    /// Text that must appear in an announced file name for it to be streamed.
    #[arg(long, env = "MEEP_MARKER_INFIX", default_value = DEFAULT_MARKER_INFIX)]
    pub marker_infix: String,

    /// Wall-clock budget for a streaming session.
    #[arg(long, env = "MEEP_SESSION_TIMEOUT_SECS", default_value_t = 15 * 60)]
    pub session_timeout_secs: u64,

    /// Budget for a synchronous /process run.
    #[arg(long, env = "MEEP_PROCESS_TIMEOUT_SECS", default_value_t = 30 * 60)]
    pub process_timeout_secs: u64,

    /// Also send simulator stderr to the client as error messages.
    #[arg(long, env = "MEEP_FORWARD_STDERR")]
    pub forward_stderr: bool,

    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    pub fn command_spec(&self) -> CommandSpec {
        match self.command.split_first() {
            Some((program, args)) => CommandSpec {
                program: program.clone(),
                args: args.to_vec(),
            },
            None => CommandSpec::new(DEFAULT_PROGRAM),
        }
    }

    pub fn session_config(&self) -> Result<SessionConfig, regex::Error> {
        Ok(SessionConfig {
            command: self.command_spec(),
            marker: FileMarker::new(&self.marker_infix)?,
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            process_timeout: Duration::from_secs(self.process_timeout_secs),
            forward_stderr: self.forward_stderr,
        })
    }
}

/// What every session needs to know, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command: CommandSpec,
    pub marker: FileMarker,
    pub session_timeout: Duration,
    pub process_timeout: Duration,
    pub forward_stderr: bool,
}

impl SessionConfig {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            // the default infix is a plain literal
            marker: FileMarker::new(DEFAULT_MARKER_INFIX).expect("static marker pattern"),
            session_timeout: Duration::from_secs(15 * 60),
            process_timeout: Duration::from_secs(30 * 60),
            forward_stderr: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["meep-host"]).unwrap();
        assert_eq!(cli.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cli.dataset, "ez");
        assert_eq!(cli.marker_infix, "ez-");
        assert!(cli.palette.is_none());
        assert!(!cli.forward_stderr);

        let cfg = cli.session_config().unwrap();
        assert_eq!(cfg.command, CommandSpec::new("meep"));
        assert_eq!(cfg.session_timeout, Duration::from_secs(900));
        assert_eq!(cfg.process_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn trailing_command() {
        let cli = Cli::try_parse_from([
            "meep-host",
            "--bind",
            "127.0.0.1:9000",
            "--session-timeout-secs",
            "5",
            "--",
            "mpirun",
            "-np",
            "4",
            "meep-mpi",
        ])
        .unwrap();
        let spec = cli.command_spec();
        assert_eq!(spec.program, "mpirun");
        assert_eq!(spec.args, vec!["-np", "4", "meep-mpi"]);
        assert_eq!(
            cli.session_config().unwrap().session_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn marker_infix_feeds_pattern() {
        let cli = Cli::try_parse_from(["meep-host", "--marker-infix", "hz-"]).unwrap();
        let cfg = cli.session_config().unwrap();
        assert!(cfg
            .marker
            .file_name(r#"creating output file "./a-hz-1.h5""#)
            .is_some());
        assert!(cfg
            .marker
            .file_name(r#"creating output file "./a-ez-1.h5""#)
            .is_none());
    }
}
