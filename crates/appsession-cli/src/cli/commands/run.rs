//! `appsession run`: one session driven over stdin/stdout.
//!
//! stdout carries `ForwardMsg` JSON lines; stdin carries `BackMsg` JSON
//! lines. The session exits on Ctrl+C, or once stdin is closed and no
//! script run is in flight.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use appsession_core::caches::{CacheRegistry, ClearableCache, MemoCache};
use appsession_core::config::{self, Config};
use appsession_core::logging;
use appsession_core::signal::FileChangeSignal;
use appsession_core::uploads::MemoryUploadedFileStore;
use appsession_core::worker::process::ProcessWorkerFactory;
use appsession_core::{AppSession, Collaborators, ScriptInfo, SessionState};
use appsession_types::ClientState;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::JsonLineWriter;
use crate::watch;

/// Secrets file location, relative to the script's directory.
const SECRETS_FILE: &str = ".appsession/secrets.toml";

pub struct RunOptions<'a> {
    pub script: &'a Path,
    pub config_path: Option<&'a Path>,
    pub query: String,
    pub run_on_save: bool,
}

pub async fn run(opts: RunOptions<'_>) -> Result<()> {
    let config_path = config::paths::resolve(opts.config_path);
    let mut config = Config::load_from(&config_path).context("load config")?;
    if opts.run_on_save {
        config.server.run_on_save = true;
    }

    let _log_guard = logging::init(&config.logging)?;

    let script = std::fs::canonicalize(opts.script)
        .with_context(|| format!("script not found: {}", opts.script.display()))?;
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");

    let source_changed = FileChangeSignal::new("source");
    let secrets_changed = FileChangeSignal::new("secrets");
    let caches = session_caches();

    let collaborators = Collaborators {
        worker_factory: Arc::new(ProcessWorkerFactory::new(config.runner.clone())?),
        options: Arc::new(config.clone()),
        uploaded_files: Arc::new(MemoryUploadedFileStore::new()),
        caches,
        source_changed: source_changed.clone(),
        secrets_changed: secrets_changed.clone(),
    };
    let mut session = AppSession::new(ScriptInfo::new(&script, command_line), collaborators);

    let cancel = CancellationToken::new();
    if let Some(interval) = config.server.file_watcher_poll() {
        watch::spawn_poller(script.clone(), interval, source_changed, cancel.clone());
        watch::spawn_poller(
            secrets_path(&script),
            interval,
            secrets_changed,
            cancel.clone(),
        );
    }

    let mut backmsgs = spawn_stdin_reader(cancel.clone());
    let mut out = JsonLineWriter::new(tokio::io::stdout());

    session.handle_backmsg(appsession_types::BackMsg::RerunScript(ClientState {
        query_string: opts.query,
        widget_states: None,
    }));

    let result = drive(
        &mut session,
        &mut backmsgs,
        &mut out,
        tokio::signal::ctrl_c(),
    )
    .await;

    cancel.cancel();
    result
}

/// Caches a clear-cache request empties.
fn session_caches() -> CacheRegistry {
    CacheRegistry::new()
        .with(Arc::new(MemoCache::new("memo")) as Arc<dyn ClearableCache>)
        .with(Arc::new(MemoCache::new("singleton")) as Arc<dyn ClearableCache>)
        .with(Arc::new(MemoCache::new("legacy")) as Arc<dyn ClearableCache>)
}

/// Runs the session until it has shut down and its worker is gone.
///
/// `interrupt` is created once and polled across passes, so an interrupt
/// that lands while output is being written is still seen.
async fn drive<W, I>(
    session: &mut AppSession,
    backmsgs: &mut mpsc::UnboundedReceiver<String>,
    out: &mut JsonLineWriter<W>,
    interrupt: I,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = session.run_pending() => {}
            line = backmsgs.recv(), if stdin_open => match line {
                Some(line) => session.handle_backmsg_json(&line),
                None => {
                    debug!("stdin closed");
                    stdin_open = false;
                }
            },
            result = &mut interrupt, if !interrupted => {
                interrupted = true;
                match result {
                    Ok(()) => {
                        info!("Interrupted");
                        session.shutdown();
                    }
                    Err(err) => warn!(error = %err, "Failed to listen for Ctrl+C"),
                }
            }
        }

        out.write_messages(session.flush()).await?;

        if !stdin_open && !session.has_worker() {
            session.shutdown();
        }
        if session.state() == SessionState::ShutdownRequested && !session.has_worker() {
            return Ok(());
        }
    }
}

fn secrets_path(script: &Path) -> PathBuf {
    script
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(SECRETS_FILE)
}

/// Forwards non-empty stdin lines until EOF or cancellation.
fn spawn_stdin_reader(cancel: CancellationToken) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "Failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use appsession_core::config::RunnerConfig;

    use super::*;

    #[test]
    fn test_session_caches_registers_every_cache() {
        assert_eq!(session_caches().len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_stops_a_running_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("app.sh");
        std::fs::write(&script, "sleep 30\n").unwrap();

        let collaborators = Collaborators {
            worker_factory: Arc::new(
                ProcessWorkerFactory::new(RunnerConfig::default()).unwrap(),
            ),
            options: Arc::new(Config::default()),
            uploaded_files: Arc::new(MemoryUploadedFileStore::new()),
            caches: session_caches(),
            source_changed: FileChangeSignal::new("source"),
            secrets_changed: FileChangeSignal::new("secrets"),
        };
        let mut session = AppSession::new(
            ScriptInfo::new(&script, "appsession run app.sh"),
            collaborators,
        );
        session.request_rerun(None);
        assert!(session.has_worker());

        // Sender stays alive so only the interrupt can end the loop.
        let (_tx, mut backmsgs) = mpsc::unbounded_channel();
        let mut out = JsonLineWriter::new(Vec::new());

        // A ready future panics if polled again, so this also checks the
        // interrupt is consumed exactly once.
        let interrupt = std::future::ready(Ok(()));
        tokio::time::timeout(
            Duration::from_secs(10),
            drive(&mut session, &mut backmsgs, &mut out, interrupt),
        )
        .await
        .expect("session did not stop")
        .unwrap();

        assert_eq!(session.state(), SessionState::ShutdownRequested);
        assert!(!session.has_worker());
    }
}
