//! OpeniTools — bridge to a locally attached iOS device.
//!
//! Thin binary entry point. All logic lives in the `openitools-core` and
//! `openitools-app` crates; this file parses flags, picks the native
//! backend and drives the control context, logging what it reports.

use anyhow::{Context, Result};
use clap::Parser;
use openitools_app::config::AppConfig;
use openitools_app::state::{AppState, ConnectionPhase, UiUpdate};
use openitools_core::model::{ExpansionState, RemoteTree};
use openitools_core::native::{NativeAdapter, NativeApi};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long one control tick waits for background results.
const TICK: Duration = Duration::from_millis(100);

/// OpeniTools — browse and download files from an attached iOS device.
#[derive(Parser, Debug)]
#[command(name = "openitools")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "openitools.toml")]
    config: PathBuf,

    /// Override the connection poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Use a simulated device instead of the native library
    #[arg(long)]
    demo: bool,

    /// Expand a device directory once connected (repeatable)
    #[arg(long, value_name = "PATH")]
    expand: Vec<String>,

    /// Download a device file to a local path once connected
    #[arg(long, num_args = 2, value_names = ["SRC", "DEST"])]
    download: Option<Vec<String>>,

    /// Stop after this many control ticks (runs until killed otherwise)
    #[arg(long, value_name = "N")]
    ticks: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(ms) = cli.poll_ms {
        config.monitor.poll_interval_ms = ms;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate().context("Invalid configuration")?;

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();

    tracing::info!("OpeniTools starting");

    let adapter = NativeAdapter::new(select_backend(cli.demo)?);
    let mut state = AppState::new(adapter, config)?;
    state.subscribe_info(Box::new(|info| {
        if info.is_empty() {
            info!("Device info cleared");
            return;
        }
        for (key, value) in info.sorted() {
            info!("  {key}: {value}");
        }
    }));
    state.start_monitor();

    let mut pending_expand = cli.expand.clone();
    let mut pending_download = cli.download.clone();
    let mut tick = 0u64;

    while cli.ticks.map_or(true, |limit| tick < limit) {
        tick += 1;
        state.tick(TICK);

        for update in state.drain_updates() {
            report(&update);
        }

        if matches!(state.phase(), ConnectionPhase::Connected(_)) {
            pending_expand.retain(|target| advance_expand(&mut state, target));

            if let Some(args) = pending_download.take() {
                if let [source, dest] = args.as_slice() {
                    state.request_download(source, dest);
                }
            }
        }
    }

    info!("OpeniTools stopping after {tick} ticks");
    Ok(())
}

#[cfg(feature = "linked")]
fn select_backend(demo: bool) -> Result<Arc<dyn NativeApi>> {
    if demo {
        return Ok(Arc::new(openitools_core::native::FakeNative::demo()));
    }
    Ok(Arc::new(openitools_core::native::LinkedNative::new()))
}

#[cfg(not(feature = "linked"))]
fn select_backend(demo: bool) -> Result<Arc<dyn NativeApi>> {
    if demo {
        return Ok(Arc::new(openitools_core::native::FakeNative::demo()));
    }
    anyhow::bail!(
        "built without the `linked` feature; rerun with --demo or rebuild with --features linked"
    )
}

fn report(update: &UiUpdate) {
    match update {
        UiUpdate::DeviceConnected(id) => info!("Device connected (session {id})"),
        UiUpdate::DeviceDisconnected => info!("Device disconnected"),
        UiUpdate::DeviceInfoChanged(_) => {}
        UiUpdate::EntriesLoaded { path, entries } => {
            info!("{path}: {} entries", entries.len());
            for entry in entries {
                info!(
                    "  {:<32} {:<18} {:>10}",
                    entry.name(),
                    entry.kind.label(),
                    entry.size_display()
                );
            }
        }
        UiUpdate::TransferProgress { source, percent } => info!("{source}: {percent}%"),
        UiUpdate::TransferFinished { job, result } => match result {
            Ok(()) => info!("Saved {} to {}", job.source, job.destination.display()),
            Err(e) => warn!("Download of {} failed: {e}", job.source),
        },
        UiUpdate::Notice(notice) if notice.retryable => {
            warn!("{} (will retry on next connect)", notice.message)
        }
        UiUpdate::Notice(notice) => warn!("{}", notice.message),
    }
}

/// Take the next step towards expanding `target`. Returns `false` once the
/// target is fully expanded or cannot be reached.
fn advance_expand(state: &mut AppState, target: &str) -> bool {
    match next_expand_step(state.tree(), target) {
        ExpandStep::Request(path) => {
            let requested = state.request_expand(&path);
            if !requested {
                warn!("Could not expand {path}; giving up on {target}");
            }
            requested
        }
        ExpandStep::Wait => true,
        ExpandStep::Done => false,
        ExpandStep::Abandon => {
            warn!("Giving up on expanding {target}");
            false
        }
    }
}

enum ExpandStep {
    Request(String),
    Wait,
    Done,
    Abandon,
}

/// Walk from the root towards `target`, expanding one level per call.
fn next_expand_step(tree: &RemoteTree, target: &str) -> ExpandStep {
    let target = openitools_core::browser::normalize_device_path(target);
    let mut prefix = String::from("/");
    let segments: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();

    for i in 0..=segments.len() {
        if i > 0 {
            if prefix != "/" {
                prefix.push('/');
            }
            prefix.push_str(segments[i - 1]);
        }
        match tree.state(&prefix) {
            ExpansionState::Expanded => continue,
            ExpansionState::Loading => return ExpandStep::Wait,
            ExpansionState::Failed(_) => return ExpandStep::Abandon,
            ExpansionState::Collapsed => {
                return match tree.find(&prefix) {
                    Some(entry) if entry.is_expandable() => ExpandStep::Request(prefix),
                    _ => ExpandStep::Abandon,
                };
            }
        }
    }
    ExpandStep::Done
}
