//! Loading result files into grids and collecting them for normalization.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::DecodeError;
use crate::queue::FrameQueue;

/// Dataset meep writes the Ez field component to.
pub const DEFAULT_DATASET: &str = "ez";

/// A 2-D field snapshot, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    data: Vec<f64>,
    height: usize,
    width: usize,
}

impl Grid {
    pub fn new(data: Vec<f64>, height: usize, width: usize) -> Result<Self, DecodeError> {
        if height == 0 || width == 0 {
            return Err(DecodeError::EmptyGrid { height, width });
        }
        if height.checked_mul(width) != Some(data.len()) {
            return Err(DecodeError::LengthMismatch {
                height,
                width,
                len: data.len(),
            });
        }
        Ok(Self {
            data,
            height,
            width,
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.width + col]
    }

    pub fn samples(&self) -> &[f64] {
        &self.data
    }

    /// Largest absolute sample. NaNs are ignored.
    pub fn peak(&self) -> f64 {
        self.data
            .iter()
            .map(|v| v.abs())
            .fold(0.0, |acc, v| if v > acc { v } else { acc })
    }
}

/// Reads one result file. Called from the blocking pool.
pub trait GridReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Grid, DecodeError>;
}

/// Reads a named 2-D dataset out of an HDF5 file.
#[derive(Debug, Clone)]
pub struct Hdf5Reader {
    dataset: String,
}

impl Hdf5Reader {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
        }
    }
}

impl Default for Hdf5Reader {
    fn default() -> Self {
        Self::new(DEFAULT_DATASET)
    }
}

#[cfg(feature = "hdf5")]
impl GridReader for Hdf5Reader {
    fn read(&self, path: &Path) -> Result<Grid, DecodeError> {
        let bad = |reason: String| DecodeError::Dataset {
            path: path.to_path_buf(),
            reason,
        };
        let file = hdf5::File::open(path).map_err(|e| bad(e.to_string()))?;
        let dataset = file.dataset(&self.dataset).map_err(|e| bad(e.to_string()))?;
        let shape = dataset.shape();
        let [height, width] = shape[..] else {
            return Err(bad(format!("expected a 2-d dataset, got shape {shape:?}")));
        };
        let data = dataset.read_raw::<f64>().map_err(|e| bad(e.to_string()))?;
        Grid::new(data, height, width)
    }
}

#[cfg(not(feature = "hdf5"))]
impl GridReader for Hdf5Reader {
    fn read(&self, path: &Path) -> Result<Grid, DecodeError> {
        debug!(dataset = %self.dataset, file = %path.display(), "no HDF5 support compiled in");
        Err(DecodeError::Unsupported(path.to_path_buf()))
    }
}

/// Decoded frames of one session, their common shape and peak magnitude.
#[derive(Debug, Default)]
pub struct FrameSet {
    frames: Vec<Grid>,
    shape: Option<(usize, usize)>,
    peak: f64,
}

impl FrameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. The first one fixes the shape for the session.
    pub fn push(&mut self, grid: Grid) -> Result<(), DecodeError> {
        match self.shape {
            Some(expected) if expected != grid.shape() => {
                return Err(DecodeError::ShapeMismatch {
                    expected,
                    found: grid.shape(),
                });
            }
            Some(_) => {}
            None => self.shape = Some(grid.shape()),
        }
        let peak = grid.peak();
        if peak > self.peak {
            self.peak = peak;
        }
        self.frames.push(grid);
        Ok(())
    }

    pub fn frames(&self) -> &[Grid] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }
}

/// Pull tokens until the producer is done, decoding each in turn. Stops at
/// the first failure.
pub async fn decode_frames(
    queue: &FrameQueue,
    reader: Arc<dyn GridReader>,
) -> Result<FrameSet, DecodeError> {
    let mut frames = FrameSet::new();
    while let Some(path) = queue.take_next().await {
        debug!(file = %path.display(), "decoding frame");
        let reader = Arc::clone(&reader);
        let grid = tokio::task::spawn_blocking(move || reader.read(&path))
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))??;
        frames.push(grid)?;
    }
    debug!(frames = frames.len(), peak = frames.peak(), "all frames decoded");
    Ok(frames)
}
