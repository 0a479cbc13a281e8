//! `storagedd`: entry point for the storage topology daemon.

use camino::Utf8PathBuf;
use clap::Parser;
use storaged_daemon::{AppState, Config};

/// Privileged block-storage topology daemon.
#[derive(Debug, Parser)]
#[command(name = "storagedd", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "/etc/storaged/storaged.toml")]
    config: Utf8PathBuf,

    /// Override the configured sysfs root (mainly for testing against a
    /// fixture tree instead of the real `/sys`).
    #[arg(long)]
    sysfs_root: Option<Utf8PathBuf>,

    /// Stay attached to the controlling terminal instead of the service
    /// manager handling output; the daemon never forks either way.
    #[arg(long)]
    foreground: bool,

    /// Increase log verbosity; repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    storaged_utils::init_tracing(default_directive(cli.verbose));
    if cli.foreground {
        tracing::debug!("running in foreground");
    }

    let mut config = Config::load(&cli.config)?;
    if let Some(root) = cli.sysfs_root {
        config.sysfs_root = root;
    }

    let mut app = AppState::new(config)?;
    tracing::info!("storaged starting");

    // Populate the registries before acting on stale state, so the
    // startup sweep only touches entries genuinely orphaned by a prior
    // crash, not every device simply because nothing's been scanned yet.
    app.scan_tick();
    app.reconcile_on_startup()?;

    let local = tokio::task::LocalSet::new();
    local.run_until(run_event_loop(app)).await
}

/// The single-threaded cooperative event loop (§5): four independent
/// timers plus a shutdown signal, all on one `LocalSet` so nothing here
/// needs internal locking.
async fn run_event_loop(mut app: AppState) -> anyhow::Result<()> {
    let mut scan_interval = tokio::time::interval(std::time::Duration::from_secs(app.config.scan_interval_secs));
    let mut poll_interval = tokio::time::interval(std::time::Duration::from_secs(app.config.poll_interval_secs));
    let mut mount_interval = tokio::time::interval(std::time::Duration::from_secs(app.config.poll_interval_secs));
    let mut md_sync_interval = tokio::time::interval(std::time::Duration::from_secs(app.config.md_sync_interval_secs));
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = scan_interval.tick() => {
                tick += 1;
                app.advance_clock(tick);
                app.scan_tick();
            }
            _ = mount_interval.tick() => {
                if let Ok(contents) = tokio::fs::read_to_string("/proc/self/mountinfo").await {
                    app.mount_tick(&contents);
                }
            }
            _ = poll_interval.tick() => {
                app.poll_tick().await;
            }
            _ = md_sync_interval.tick() => {
                app.md_sync_tick();
            }
            _ = shutdown_signal() => {
                tracing::info!("storaged shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
