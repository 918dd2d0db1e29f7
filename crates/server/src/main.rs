use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jsonwatch_core::{Config, SourceLocation};
use jsonwatch_server::cli::Cli;
use jsonwatch_server::snapshot::{run_operator_commands, SnapshotWriter};
use jsonwatch_server::ui::Ui;
use jsonwatch_server::watch::FileWatchSource;
use jsonwatch_server::ReloadSupervisor;

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jsonwatch_core::config::load_dotenv();
    let config = Cli::parse().into_config(Config::from_env());
    init_tracing(config.quiet);

    let ui = if config.quiet { Ui::silent() } else { Ui::stdout() };
    config.ensure_snapshots_dir()?;
    config.log_summary();
    ui.banner();

    let source = SourceLocation::parse(&config.source)?;
    let supervisor = Arc::new(ReloadSupervisor::new(config.clone(), source.clone(), ui));
    supervisor.start().await?;

    ui.line("  Type s + enter at any time to create a snapshot of the database");
    let writer = SnapshotWriter::new(config.snapshots.clone());
    tokio::spawn(run_operator_commands(
        BufReader::new(tokio::io::stdin()),
        Arc::clone(&supervisor),
        writer,
        ui,
    ));

    let (changes_tx, changes_rx) = mpsc::channel(16);
    let _subscription = if config.watch.enabled {
        ui.line("  Watching...");
        ui.line("");
        let watch = FileWatchSource::new(
            &source,
            config.watch.routes.as_deref(),
            config.watch.routes_poll_interval(),
        )
        .context("cannot watch source")?;
        Some(watch.spawn(changes_tx.clone())?)
    } else {
        None
    };

    tokio::select! {
        result = supervisor.run(changes_rx) => {
            if let Err(e) = result {
                supervisor.shutdown().await;
                return Err(e.into());
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
        }
    }

    drop(changes_tx);
    supervisor.shutdown().await;
    Ok(())
}
