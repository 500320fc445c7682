//! gantry: run a test binary on a remotely-controlled device.
//!
//! Deploys the target's artifacts (incrementally, via content
//! fingerprinting), launches the binary, supervises it to an outcome, and
//! prints the captured transcript to stdout. The process exits `0` only
//! when the remote binary reported `0` through its exit marker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gantry_core::channel::AdbChannel;
use gantry_core::config::LauncherConfig;
use gantry_core::fingerprint::ArtifactSet;
use gantry_core::supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Run a test binary on a remotely-controlled device.
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Name of the test target to run
    target: String,

    /// Path to the launch profile
    #[arg(short, long, default_value = "gantry.toml")]
    config: PathBuf,

    /// Build output directory containing the package, lib/, and content
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    /// Device serial to target (overrides the profile)
    #[arg(short = 's', long)]
    serial: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Extra command-line parameters forwarded to the binary
    #[arg(last = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let mut config = LauncherConfig::from_file(&cli.config)
        .with_context(|| format!("loading profile {}", cli.config.display()))?;
    config.extra_args.extend(cli.args.iter().cloned());

    let serial = cli.serial.clone().or_else(|| config.device_serial.clone());
    let channel = Arc::new(AdbChannel::new(serial));

    let artifacts = ArtifactSet {
        package: cli.out_dir.join(&config.package_file),
        binary: cli.out_dir.join("lib").join(format!("lib{}.so", cli.target)),
        content_root: cli.out_dir.join(&config.content_dir),
    };

    let mut supervisor = Supervisor::new(channel, config, artifacts)?;

    // Interrupts must stop the remote application before this process is
    // allowed to terminate; the token is checked inside the run loop.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping the remote application");
            trigger.cancel();
        }
    });

    let outcome = supervisor.run(cancel).await?;
    if !outcome.completed {
        warn!("run ended without a confirmed exit");
    }

    std::process::exit(outcome.return_code);
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
