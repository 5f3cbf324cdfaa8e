//! Runs the meep FDTD simulator on behalf of WebSocket clients and streams
//! its field snapshots back as palette-coloured frames.

pub mod batch;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod palette;
pub mod process;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod workspace;

pub use config::{Cli, SessionConfig};
pub use decode::{Grid, GridReader, Hdf5Reader};
pub use error::{DecodeError, PaletteError, SessionError};
pub use palette::Palette;
pub use server::{router, serve, AppState};
