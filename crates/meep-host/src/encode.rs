//! Quantizing frames through the palette and streaming them to the client.

use tracing::debug;

use crate::decode::{FrameSet, Grid};
use crate::error::SessionError;
use crate::palette::{Color, Palette};
use crate::protocol::{ClientTx, MSG_COMPLETED};

/// Maps samples in `[-peak, peak]` linearly onto palette indices.
#[derive(Debug, Clone, Copy)]
pub struct Quantizer {
    peak: f64,
    factor: f64,
    top: usize,
}

impl Quantizer {
    pub fn new(peak: f64, palette_len: usize) -> Self {
        let top = palette_len.saturating_sub(1);
        let factor = if peak > 0.0 && peak.is_finite() {
            top as f64 / (2.0 * peak)
        } else {
            0.0
        };
        Self { peak, factor, top }
    }

    /// True for an all-zero (or unusable) field: every sample is the midpoint.
    pub fn is_degenerate(&self) -> bool {
        self.factor == 0.0
    }

    pub fn midpoint(&self) -> usize {
        (self.top as f64 / 2.0).round() as usize
    }

    pub fn index(&self, sample: f64) -> usize {
        if self.is_degenerate() {
            return self.midpoint();
        }
        let scaled = ((sample + self.peak) * self.factor).round();
        // NaN lands on 0 through the saturating cast
        (scaled.max(0.0) as usize).min(self.top)
    }
}

/// Pixel order the client expects: columns from last to first, each column
/// top to bottom.
pub fn traversal(height: usize, width: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..width)
        .rev()
        .flat_map(move |col| (0..height).map(move |row| (row, col)))
}

/// Receives a frame one pixel at a time. `last` is set on the final pixel.
pub trait ChunkSink {
    fn chunk(&mut self, color: &Color, last: bool);
}

/// Concatenates chunks into one binary message per frame.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buf: Vec<u8>,
    complete: Option<Vec<u8>>,
}

impl MessageAssembler {
    pub fn with_capacity(pixels: usize) -> Self {
        Self {
            buf: Vec::with_capacity(pixels * 4),
            complete: None,
        }
    }

    /// The finished message, once the terminal chunk arrived.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        self.complete.take()
    }
}

impl ChunkSink for MessageAssembler {
    fn chunk(&mut self, color: &Color, last: bool) {
        self.buf.extend_from_slice(color);
        if last {
            self.complete = Some(std::mem::take(&mut self.buf));
        }
    }
}

pub fn walk_frame<S: ChunkSink>(
    grid: &Grid,
    quantizer: &Quantizer,
    palette: &Palette,
    sink: &mut S,
) {
    let total = grid.height() * grid.width();
    for (n, (row, col)) in traversal(grid.height(), grid.width()).enumerate() {
        let color = palette.color(quantizer.index(grid.get(row, col)));
        sink.chunk(color, n + 1 == total);
    }
}

/// One binary message for `grid`.
pub fn encode_frame(grid: &Grid, quantizer: &Quantizer, palette: &Palette) -> Vec<u8> {
    let mut assembler = MessageAssembler::with_capacity(grid.height() * grid.width());
    walk_frame(grid, quantizer, palette, &mut assembler);
    assembler.take().unwrap_or_default()
}

/// Send every frame with a progress notice before each, then the success
/// notice and `end`. Stops at the first failed send.
pub async fn stream_frames(
    frames: &FrameSet,
    palette: &Palette,
    client: &ClientTx,
) -> Result<(), SessionError> {
    let quantizer = Quantizer::new(frames.peak(), palette.len());
    let count = frames.len();
    debug!(count, peak = frames.peak(), degenerate = quantizer.is_degenerate(), "streaming frames");

    for (i, grid) in frames.frames().iter().enumerate() {
        client
            .succ(format!("Sending image {} of {}", i + 1, count))
            .await?;
        client.binary(encode_frame(grid, &quantizer, palette)).await?;
    }
    client.succ(MSG_COMPLETED).await?;
    client.end().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Outbound;

    fn ramp_palette(len: usize) -> Palette {
        Palette::from_colors((0..len).map(|i| [i as u8, 0, 0, 255]).collect()).unwrap()
    }

    #[derive(Default)]
    struct Recorder(Vec<(Color, bool)>);

    impl ChunkSink for Recorder {
        fn chunk(&mut self, color: &Color, last: bool) {
            self.0.push((*color, last));
        }
    }

    #[test]
    fn factor_spans_palette() {
        let q = Quantizer::new(2.0, 256);
        assert_eq!(q.index(-2.0), 0);
        assert_eq!(q.index(2.0), 255);
        assert_eq!(q.index(0.0), 128);
        // outside the range clamps
        assert_eq!(q.index(-10.0), 0);
        assert_eq!(q.index(10.0), 255);
    }

    #[test]
    fn quantization_is_monotonic() {
        let q = Quantizer::new(3.7, 64);
        let samples: Vec<f64> = (-100..=100).map(|i| i as f64 * 0.05).collect();
        for pair in samples.windows(2) {
            assert!(q.index(pair[0]) <= q.index(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn zero_peak_maps_to_midpoint() {
        let q = Quantizer::new(0.0, 256);
        assert!(q.is_degenerate());
        assert_eq!(q.index(0.0), 128);
        assert_eq!(Quantizer::new(0.0, 5).index(0.0), 2);
    }

    #[test]
    fn nan_sample_maps_to_zero() {
        assert_eq!(Quantizer::new(1.0, 16).index(f64::NAN), 0);
    }

    #[test]
    fn traversal_is_columns_reversed_rows_forward() {
        let order: Vec<_> = traversal(2, 3).collect();
        assert_eq!(order, vec![(0, 2), (1, 2), (0, 1), (1, 1), (0, 0), (1, 0)]);
    }

    #[test]
    fn only_final_pixel_is_terminal() {
        let grid = Grid::new(vec![0.0; 6], 2, 3).unwrap();
        let mut rec = Recorder::default();
        walk_frame(&grid, &Quantizer::new(1.0, 4), &ramp_palette(4), &mut rec);
        let flags: Vec<bool> = rec.0.iter().map(|(_, last)| *last).collect();
        assert_eq!(flags, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn encoded_frame_follows_traversal() {
        // row-major 2x2: [[-1, 1], [0, 1]]
        let grid = Grid::new(vec![-1.0, 1.0, 0.0, 1.0], 2, 2).unwrap();
        let palette = ramp_palette(3);
        let bytes = encode_frame(&grid, &Quantizer::new(1.0, 3), &palette);
        let indices: Vec<u8> = bytes.chunks(4).map(|c| c[0]).collect();
        // column 1 (1, 1) then column 0 (-1, 0)
        assert_eq!(indices, vec![2, 2, 0, 1]);
    }

    #[test]
    fn single_pixel_frame() {
        let grid = Grid::new(vec![0.5], 1, 1).unwrap();
        let bytes = encode_frame(&grid, &Quantizer::new(0.5, 2), &ramp_palette(2));
        assert_eq!(bytes, vec![1, 0, 0, 255]);
    }

    #[tokio::test]
    async fn stream_frames_message_sequence() {
        let mut set = FrameSet::new();
        set.push(Grid::new(vec![1.0, -1.0], 1, 2).unwrap()).unwrap();
        set.push(Grid::new(vec![0.0, 0.0], 1, 2).unwrap()).unwrap();
        let palette = ramp_palette(3);
        let (client, mut rx) = ClientTx::channel();

        stream_frames(&set, &palette, &client).await.unwrap();
        drop(client);

        let mut got = Vec::new();
        while let Some(msg) = rx.recv().await {
            got.push(msg);
        }
        assert_eq!(
            got,
            vec![
                Outbound::Succ("Sending image 1 of 2".into()),
                Outbound::Binary(vec![0, 0, 0, 255, 2, 0, 0, 255]),
                Outbound::Succ("Sending image 2 of 2".into()),
                Outbound::Binary(vec![1, 0, 0, 255, 1, 0, 0, 255]),
                Outbound::Succ(MSG_COMPLETED.into()),
                Outbound::End,
            ]
        );
    }

    #[tokio::test]
    async fn all_zero_session_streams_midpoint() {
        let mut set = FrameSet::new();
        set.push(Grid::new(vec![0.0; 4], 2, 2).unwrap()).unwrap();
        let palette = ramp_palette(5);
        let (client, mut rx) = ClientTx::channel();
        stream_frames(&set, &palette, &client).await.unwrap();
        let _progress = rx.recv().await;
        match rx.recv().await {
            Some(Outbound::Binary(bytes)) => {
                assert!(bytes.chunks(4).all(|c| c[0] == 2));
            }
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_failure_aborts() {
        let mut set = FrameSet::new();
        set.push(Grid::new(vec![1.0], 1, 1).unwrap()).unwrap();
        let (client, rx) = ClientTx::channel();
        drop(rx);
        assert!(matches!(
            stream_frames(&set, &ramp_palette(2), &client).await,
            Err(SessionError::Transport)
        ));
    }
}
