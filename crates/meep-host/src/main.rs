use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meep_host::palette::{self, Palette};
use meep_host::{serve, AppState, Cli, Hdf5Reader};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let loaded = match &cli.palette {
        Some(path) => Palette::load(path),
        None => Palette::embedded(),
    };
    let palette = match loaded {
        Ok(p) => palette::install(p),
        Err(err) => {
            error!(%err, path = ?cli.palette, "failed to load palette");
            process::exit(1);
        }
    };

    let config = match cli.session_config() {
        Ok(c) => c,
        Err(err) => {
            error!(%err, infix = %cli.marker_infix, "invalid marker infix");
            process::exit(1);
        }
    };

    if !cfg!(feature = "hdf5") {
        warn!("built without the `hdf5` feature, every result file will fail to decode");
    }

    let listener = match TcpListener::bind(cli.bind).await {
        Ok(l) => l,
        Err(err) => {
            error!(%err, bind = %cli.bind, "failed to bind");
            process::exit(1);
        }
    };

    info!(
        command = ?config.command,
        dataset = %cli.dataset,
        colors = palette.len(),
        session_timeout = ?config.session_timeout,
        "starting meep-host"
    );

    let reader = Arc::new(Hdf5Reader::new(cli.dataset.clone()));
    let state = AppState::new(config, palette, reader);
    if let Err(err) = serve(listener, state).await {
        error!(%err, "server stopped");
        process::exit(1);
    }
}
