//! Modification-time polling for watched files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use appsession_core::signal::FileChangeSignal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polls `path` every `interval` and emits `signal` when its modification
/// time changes (including the file appearing or disappearing).
pub fn spawn_poller(
    path: PathBuf,
    interval: Duration,
    signal: FileChangeSignal,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = modified(&path);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = modified(&path);
            if current != last {
                debug!(path = %path.display(), signal = signal.name(), "Watched file changed");
                last = current;
                signal.emit();
            }
        }
    })
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
