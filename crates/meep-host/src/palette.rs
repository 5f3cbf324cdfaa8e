//! Colour table used to turn normalized field samples into pixels.
//!
//! The table is the first pixel row of a PNG, read left to right. Each entry
//! is the pixel packed as a 32-bit ARGB value and stored little-endian, which
//! is the layout the browser client draws from (bytes B, G, R, A).

use std::path::Path;
use std::sync::OnceLock;

use crate::error::PaletteError;

/// Bundled blue/white/red diverging palette, 256 entries.
const EMBEDDED_PNG: &[u8] = include_bytes!("../assets/palette.png");

static PALETTE: OnceLock<Palette> = OnceLock::new();

/// One packed colour, ready to go on the wire.
pub type Color = [u8; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    /// Build a palette from already-packed entries. Needs at least two.
    pub fn from_colors(colors: Vec<Color>) -> Result<Self, PaletteError> {
        if colors.len() < 2 {
            return Err(PaletteError::TooSmall(colors.len() as u32));
        }
        Ok(Self { colors })
    }

    pub fn from_png_bytes(bytes: &[u8]) -> Result<Self, PaletteError> {
        let image = image::load_from_memory(bytes)?;
        Self::from_image(image)
    }

    pub fn load(path: &Path) -> Result<Self, PaletteError> {
        let image = image::open(path)?;
        Self::from_image(image)
    }

    pub fn embedded() -> Result<Self, PaletteError> {
        Self::from_png_bytes(EMBEDDED_PNG)
    }

    fn from_image(image: image::DynamicImage) -> Result<Self, PaletteError> {
        let rgba = image.to_rgba8();
        if rgba.width() < 2 || rgba.height() == 0 {
            return Err(PaletteError::TooSmall(rgba.width()));
        }
        let colors = (0..rgba.width())
            .map(|x| {
                let [r, g, b, a] = rgba.get_pixel(x, 0).0;
                pack_argb(r, g, b, a)
            })
            .collect();
        Ok(Self { colors })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Highest valid index.
    pub fn top(&self) -> usize {
        self.colors.len() - 1
    }

    /// Entry at `index`, clamped to the table.
    pub fn color(&self, index: usize) -> &Color {
        &self.colors[index.min(self.top())]
    }
}

/// ARGB as a u32, little-endian.
pub fn pack_argb(r: u8, g: u8, b: u8, a: u8) -> Color {
    u32::from_be_bytes([a, r, g, b]).to_le_bytes()
}

/// Install the process-wide palette. The first call wins; later calls get the
/// palette that is already installed.
pub fn install(palette: Palette) -> &'static Palette {
    PALETTE.get_or_init(|| palette)
}
