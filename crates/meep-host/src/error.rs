//! Error types shared by the session pipeline.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Anything that ends a session early. Every variant is terminal: nothing is
/// retried, and cleanup runs regardless of which one fired.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("failed to spawn `{command}`: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("simulator pipe failed: {0}")]
    Pipe(#[source] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("client transport closed")]
    Transport,
    #[error("session exceeded its {0:?} budget")]
    TimeoutExceeded(Duration),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bad dataset in {path}: {reason}")]
    Dataset { path: PathBuf, reason: String },
    #[error("grid has no samples ({height}x{width})")]
    EmptyGrid { height: usize, width: usize },
    #[error("grid of {height}x{width} cannot hold {len} samples")]
    LengthMismatch {
        height: usize,
        width: usize,
        len: usize,
    },
    #[error("frame is {found:?} but the session started at {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("built without HDF5 support, cannot read {0}")]
    Unsupported(PathBuf),
    #[error("decode task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("failed to decode palette image: {0}")]
    Image(#[from] image::ImageError),
    #[error("palette needs at least 2 colours, image is {0} pixels wide")]
    TooSmall(u32),
}
