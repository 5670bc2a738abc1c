//! Record depth diffs, trades and snapshots until the daily cutoff.
//!
//! ```text
//! depth-recorder BTCUSDT ETHUSDT
//! DEPTH_RECORDER_SYMBOLS=BTCUSDT,ETHUSDT depth-recorder
//! ```
//!
//! Symbols given on the command line take precedence over
//! `DEPTH_RECORDER_SYMBOLS`. Set `RUST_LOG` to change verbosity.

use std::process::ExitCode;

use depth_recorder::config::env;
use depth_recorder::{Config, Error, Recorder};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<Config, Error> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return Config::from_env();
    }

    let symbols = args.join(",");
    Config::from_lookup(|key| {
        if key == env::SYMBOLS {
            Some(symbols.clone())
        } else {
            std::env::var(key).ok()
        }
    })
}

/// Resolve when SIGINT (or SIGTERM on unix) arrives
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("depth_recorder=info")),
        )
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        symbols = ?config.symbols(),
        data_dir = %config.data_dir().display(),
        environment = ?config.environment(),
        "Starting recorder"
    );

    let recorder = match Recorder::binance(config) {
        Ok(recorder) => recorder,
        Err(e) => {
            error!(error = %e, "Failed to create recorder");
            return ExitCode::FAILURE;
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received, stopping after the final flush");
        let _ = stop_tx.send(true);
    });

    match recorder.run(stop_rx).await {
        Ok(reason) => {
            info!(reason = ?reason, "Recorder exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Recorder failed");
            ExitCode::FAILURE
        }
    }
}
