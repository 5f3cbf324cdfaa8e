//! Per-session scratch directory the simulator runs in.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::SessionError;

pub const WORKSPACE_PREFIX: &str = "meepserver";

/// Exclusively-owned temp directory. Removed by [`Workspace::close`] or, if
/// that never ran, on drop.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    closed: bool,
}

impl Workspace {
    pub fn create(prefix: &str) -> Result<Self, SessionError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(SessionError::Workspace)?;
        // Deletion is ours to do, with per-entry logging.
        #[allow(deprecated)]
        let path = dir.into_path();
        debug!(workspace = %path.display(), "workspace created");
        Ok(Self {
            path,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete every entry, then the directory. Failures are logged and
    /// skipped. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match fs::read_dir(&self.path) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let entry_path = entry.path();
                    if let Err(err) = fs::remove_file(&entry_path) {
                        warn!(
                            path = %entry_path.display(),
                            %err,
                            "failed to delete workspace entry"
                        );
                    }
                }
            }
            Err(err) => {
                warn!(workspace = %self.path.display(), %err, "failed to list workspace");
            }
        }

        if let Err(err) = fs::remove_dir(&self.path) {
            warn!(workspace = %self.path.display(), %err, "failed to delete workspace");
        } else {
            debug!(workspace = %self.path.display(), "workspace removed");
        }
    }
}

/// Path under `dir` for a file name reported by the simulator. Names are
/// usually relative to the working directory (`./foo-ez-000100.00.h5`);
/// root, `.` and `..` components are dropped so the result never leaves `dir`.
pub fn resolve_in(dir: &Path, name: &str) -> PathBuf {
    let relative: PathBuf = Path::new(name)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    dir.join(relative)
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.close();
    }
}
