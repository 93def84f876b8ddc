use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;

use nodepool_core::output::FileArtifacts;
use nodepool_core::settings::Settings;
use nodepool_core::store::{Store, StorePaths};
use nodepool_pipeline::run::{self, RunError};

#[derive(Parser)]
#[command(
    name = "nodepool",
    version,
    about = "Aggregate proxy subscriptions, probe their nodes, emit a ranked configuration"
)]
struct Args {
    /// Subscription list file: one URL per line, '#' starts a comment
    sources: PathBuf,

    /// State directory (defaults to the platform data dir)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Artifact output directory (defaults to <state dir>/generated)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("rustls crypto provider already installed");
    }

    let paths = match args.state_dir {
        Some(dir) => StorePaths::from_dir(dir),
        None => match StorePaths::new() {
            Ok(paths) => paths,
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        },
    };
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| paths.state_dir().join("generated"));

    let settings = Settings::from_env();
    let writer = FileArtifacts::new(output_dir, settings.compact_output_nodes);
    let mut store = Store::open(paths);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });

    match run::execute_run(&args.sources, &mut store, &writer, &settings, &cancel_rx).await {
        Ok(summary) => {
            print!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e @ RunError::SourceList { .. }) => {
            log::error!("{e}");
            ExitCode::from(2)
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
