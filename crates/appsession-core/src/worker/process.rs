//! Worker that runs the script as a child process.
//!
//! Each run spawns `<interpreter> [args..] <script>` with the rerun data in
//! its environment. Every stdout line becomes a `Delta` message; a line of
//! the form `{"set_state": {...}}` updates the session state instead.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use appsession_types::{ForwardMsg, RerunData};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::requests::{ScriptRequest, ScriptRequests};
use super::{ScriptEvent, ScriptWorker, WorkerContext, WorkerFactory};
use crate::config::RunnerConfig;

pub const QUERY_STRING_ENV: &str = "APPSESSION_QUERY_STRING";
pub const WIDGET_STATES_ENV: &str = "APPSESSION_WIDGET_STATES";
pub const SESSION_STATE_ENV: &str = "APPSESSION_SESSION_STATE";
pub const SESSION_ID_ENV: &str = "APPSESSION_SESSION_ID";

/// Max stderr lines quoted in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Creates `ProcessWorker`s on a tokio runtime.
#[derive(Debug, Clone)]
pub struct ProcessWorkerFactory {
    runner: RunnerConfig,
    runtime: Handle,
}

impl ProcessWorkerFactory {
    /// Binds the factory to the current tokio runtime.
    pub fn new(runner: RunnerConfig) -> Result<Self> {
        let runtime = Handle::try_current().context("ProcessWorkerFactory needs a tokio runtime")?;
        Ok(Self { runner, runtime })
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn create(&self, ctx: WorkerContext) -> Arc<dyn ScriptWorker> {
        Arc::new(ProcessWorker::new(ctx, self.runner.clone(), self.runtime.clone()))
    }
}

pub struct ProcessWorker {
    ctx: WorkerContext,
    runner: RunnerConfig,
    runtime: Handle,
    requests: Arc<ScriptRequests>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl ProcessWorker {
    pub fn new(ctx: WorkerContext, runner: RunnerConfig, runtime: Handle) -> Self {
        Self {
            ctx,
            runner,
            runtime,
            requests: Arc::new(ScriptRequests::new()),
            wake: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }
}

impl ScriptWorker for ProcessWorker {
    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let run = RunLoop {
            ctx: self.ctx.clone(),
            runner: self.runner.clone(),
            requests: Arc::clone(&self.requests),
            wake: Arc::clone(&self.wake),
            cancel: self.cancel.clone(),
        };
        self.runtime.spawn(run.run());
    }

    fn request_stop(&self) {
        self.requests.request_stop();
        self.cancel.cancel();
    }

    fn request_rerun(&self, data: RerunData) -> bool {
        let accepted = self.requests.request_rerun(data);
        if accepted {
            self.wake.notify_one();
        }
        accepted
    }
}

/// How a single run ended.
enum RunOutcome {
    Exited(ExitStatus, String),
    Interrupted(ScriptRequest),
}

struct RunLoop {
    ctx: WorkerContext,
    runner: RunnerConfig,
    requests: Arc<ScriptRequests>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn run(self) {
        let worker = self.ctx.worker_id;
        let events = self.ctx.events.clone();
        let mut data = self.ctx.initial_rerun_data.clone();

        info!(%worker, script = %self.ctx.script.main_script_path.display(), "Worker started");

        while !self.cancel.is_cancelled() {
            events.emit(ScriptEvent::ScriptStarted);

            let next = match self.run_once(&data).await {
                Ok(RunOutcome::Exited(status, _)) if status.success() => {
                    events.emit(ScriptEvent::ScriptStoppedWithSuccess);
                    self.requests.on_script_finished()
                }
                Ok(RunOutcome::Exited(status, stderr)) => {
                    let error = if stderr.is_empty() {
                        format!("script exited with {status}")
                    } else {
                        format!("script exited with {status}: {stderr}")
                    };
                    events.emit(ScriptEvent::ScriptStoppedWithError { error });
                    self.requests.on_script_finished()
                }
                Ok(RunOutcome::Interrupted(request)) => {
                    events.emit(ScriptEvent::ScriptStoppedWithSuccess);
                    request
                }
                Err(err) => {
                    events.emit(ScriptEvent::ScriptStoppedWithError {
                        error: format!("{err:#}"),
                    });
                    self.requests.on_script_finished()
                }
            };

            match next {
                ScriptRequest::Rerun(next_data) => {
                    debug!(%worker, "Rerunning script");
                    data = next_data;
                }
                ScriptRequest::Stop => break,
            }
        }

        info!(%worker, "Worker shut down");
        events.emit(ScriptEvent::Shutdown);
    }

    async fn run_once(&self, data: &RerunData) -> Result<RunOutcome> {
        let mut child = self.spawn(data)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("child stdout was not captured"))?;
        let stderr_task = tokio::spawn(stderr_tail(child.stderr.take(), STDERR_TAIL_LINES));

        // Split on raw bytes: scripts may print anything, not only UTF-8.
        let mut lines = BufReader::new(stdout).split(b'\n');
        let mut stdout_done = false;

        loop {
            tokio::select! {
                line = lines.next_segment(), if !stdout_done => {
                    match line.context("Failed to read script output")? {
                        Some(bytes) => self.handle_output_line(&decode_line(&bytes)),
                        None => stdout_done = true,
                    }
                }
                status = child.wait(), if stdout_done => {
                    let status = status.context("Failed to wait for script")?;
                    let stderr = stderr_task.await.unwrap_or_default();
                    return Ok(RunOutcome::Exited(status, stderr));
                }
                () = self.cancel.cancelled() => {
                    kill(&mut child).await;
                    return Ok(RunOutcome::Interrupted(ScriptRequest::Stop));
                }
                () = self.wake.notified() => {
                    if let Some(request) = self.requests.on_script_yield() {
                        kill(&mut child).await;
                        return Ok(RunOutcome::Interrupted(request));
                    }
                }
            }
        }
    }

    fn spawn(&self, data: &RerunData) -> Result<Child> {
        let script = &self.ctx.script.main_script_path;
        let widget_states = serde_json::to_string(&data.widget_states)
            .context("Failed to encode widget states")?;
        let session_state = serde_json::to_string(&self.ctx.session_state.snapshot())
            .context("Failed to encode session state")?;

        Command::new(&self.runner.interpreter)
            .args(&self.runner.args)
            .arg(script)
            .env(QUERY_STRING_ENV, &data.query_string)
            .env(WIDGET_STATES_ENV, widget_states)
            .env(SESSION_STATE_ENV, session_state)
            .env(SESSION_ID_ENV, self.ctx.session_id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to run {} {}",
                    self.runner.interpreter,
                    script.display()
                )
            })
    }

    fn handle_output_line(&self, line: &str) {
        let payload = serde_json::from_str::<Value>(line)
            .unwrap_or_else(|_| Value::String(line.to_string()));

        if let Some(Value::Object(updates)) = payload.get("set_state") {
            for (key, value) in updates {
                self.ctx.session_state.set(key.clone(), value.clone());
            }
            return;
        }

        self.ctx
            .events
            .emit(ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta { payload }));
    }
}

async fn kill(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!(error = %err, "Failed to kill script process");
    }
}

/// Decodes one output line, replacing invalid UTF-8 and dropping a
/// trailing `\r`.
fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    line.strip_suffix('\r').unwrap_or(&*line).to_string()
}

/// Reads stderr to the end, keeping only the last `max_lines` lines.
async fn stderr_tail(stderr: Option<ChildStderr>, max_lines: usize) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };

    let mut tail = VecDeque::with_capacity(max_lines);
    let mut lines = BufReader::new(stderr).split(b'\n');
    loop {
        match lines.next_segment().await {
            Ok(Some(bytes)) => push_bounded(&mut tail, decode_line(&bytes), max_lines),
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "Failed to read script stderr");
                break;
            }
        }
    }

    Vec::from(tail).join("\n")
}

fn push_bounded(tail: &mut VecDeque<String>, line: String, max_lines: usize) {
    if max_lines == 0 {
        return;
    }
    if tail.len() == max_lines {
        tail.pop_front();
    }
    tail.push_back(line);
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use appsession_types::ClientState;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::{ControlMsg, ScriptInfo, SessionId};
    use crate::state_store::SessionStateStore;
    use crate::worker::{WorkerEvent, WorkerEventSender, WorkerId};

    fn context(
        script: &Path,
        data: RerunData,
    ) -> (WorkerContext, mpsc::UnboundedReceiver<ControlMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            worker_id: WorkerId(1),
            session_id: SessionId::new(),
            script: ScriptInfo::new(script, "test"),
            session_state: SessionStateStore::new(),
            client_state: ClientState::default(),
            initial_rerun_data: data,
            events: WorkerEventSender::new(WorkerId(1), tx),
        };
        (ctx, rx)
    }

    async fn collect_until_shutdown(
        rx: &mut mpsc::UnboundedReceiver<ControlMsg>,
    ) -> Vec<ScriptEvent> {
        let mut events = Vec::new();
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("worker timed out")
                .expect("channel closed");
            if let ControlMsg::Worker(WorkerEvent { event, .. }) = msg {
                let done = event == ScriptEvent::Shutdown;
                events.push(event);
                if done {
                    return events;
                }
            }
        }
    }

    fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("app.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_successful_run_emits_lifecycle_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo hello\necho \"$APPSESSION_QUERY_STRING\"\necho '{\"n\": 1}'\n",
        );
        let (ctx, mut rx) = context(&script, RerunData::new("a=1", None));
        let worker = ProcessWorker::new(ctx, RunnerConfig::default(), Handle::current());

        worker.start();
        let events = collect_until_shutdown(&mut rx).await;

        assert_eq!(
            events,
            vec![
                ScriptEvent::ScriptStarted,
                ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta {
                    payload: json!("hello")
                }),
                ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta {
                    payload: json!("a=1")
                }),
                ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta {
                    payload: json!({"n": 1})
                }),
                ScriptEvent::ScriptStoppedWithSuccess,
                ScriptEvent::Shutdown,
            ]
        );
        assert!(!worker.request_rerun(RerunData::default()));
    }

    #[tokio::test]
    async fn test_failing_script_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo boom >&2\nexit 3\n");
        let (ctx, mut rx) = context(&script, RerunData::default());
        let worker = ProcessWorker::new(ctx, RunnerConfig::default(), Handle::current());

        worker.start();
        let events = collect_until_shutdown(&mut rx).await;

        let ScriptEvent::ScriptStoppedWithError { error } = &events[1] else {
            panic!("expected an error stop, got {events:?}");
        };
        assert!(error.contains("boom"), "{error}");
    }

    #[tokio::test]
    async fn test_set_state_lines_update_session_state() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo '{\"set_state\": {\"count\": 5}}'\n");
        let (ctx, mut rx) = context(&script, RerunData::default());
        let store = ctx.session_state.clone();
        let worker = ProcessWorker::new(ctx, RunnerConfig::default(), Handle::current());

        worker.start();
        let events = collect_until_shutdown(&mut rx).await;

        assert_eq!(store.get("count"), Some(json!(5)));
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, ScriptEvent::EnqueueForwardMsg(_)))
        );
    }

    #[tokio::test]
    async fn test_stop_kills_running_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo ready\nsleep 30\n");
        let (ctx, mut rx) = context(&script, RerunData::default());
        let worker = ProcessWorker::new(ctx, RunnerConfig::default(), Handle::current());

        worker.start();
        // Wait for the first output line so the child is running.
        loop {
            if let Some(ControlMsg::Worker(WorkerEvent {
                event: ScriptEvent::EnqueueForwardMsg(_),
                ..
            })) = rx.recv().await
            {
                break;
            }
        }
        worker.request_stop();

        let events = collect_until_shutdown(&mut rx).await;
        assert_eq!(
            events,
            vec![ScriptEvent::ScriptStoppedWithSuccess, ScriptEvent::Shutdown]
        );
    }

    #[tokio::test]
    async fn test_rerun_mid_run_restarts_with_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo \"$APPSESSION_QUERY_STRING\"\nif [ \"$APPSESSION_QUERY_STRING\" = first ]; then sleep 30; fi\n",
        );
        let (ctx, mut rx) = context(&script, RerunData::new("first", None));
        let worker = ProcessWorker::new(ctx, RunnerConfig::default(), Handle::current());

        worker.start();
        loop {
            if let Some(ControlMsg::Worker(WorkerEvent {
                event: ScriptEvent::EnqueueForwardMsg(_),
                ..
            })) = rx.recv().await
            {
                break;
            }
        }
        assert!(worker.request_rerun(RerunData::new("second", None)));

        let events = collect_until_shutdown(&mut rx).await;
        assert_eq!(
            events,
            vec![
                ScriptEvent::ScriptStoppedWithSuccess,
                ScriptEvent::ScriptStarted,
                ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta {
                    payload: json!("second")
                }),
                ScriptEvent::ScriptStoppedWithSuccess,
                ScriptEvent::Shutdown,
            ]
        );
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_forwarded_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo before\nprintf 'caf\\351\\n'\necho after\n");
        let (ctx, mut rx) = context(&script, RerunData::default());
        let worker = ProcessWorker::new(ctx, RunnerConfig::default(), Handle::current());

        worker.start();
        let events = collect_until_shutdown(&mut rx).await;

        assert_eq!(
            events,
            vec![
                ScriptEvent::ScriptStarted,
                ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta {
                    payload: json!("before")
                }),
                ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta {
                    payload: json!("caf\u{FFFD}")
                }),
                ScriptEvent::EnqueueForwardMsg(ForwardMsg::Delta {
                    payload: json!("after")
                }),
                ScriptEvent::ScriptStoppedWithSuccess,
                ScriptEvent::Shutdown,
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_detail_keeps_only_last_stderr_lines() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "i=0\nwhile [ $i -lt 50 ]; do echo line$i >&2; i=$((i+1)); done\nprintf 'bad\\377\\n' >&2\nexit 1\n",
        );
        let (ctx, mut rx) = context(&script, RerunData::default());
        let worker = ProcessWorker::new(ctx, RunnerConfig::default(), Handle::current());

        worker.start();
        let events = collect_until_shutdown(&mut rx).await;

        let ScriptEvent::ScriptStoppedWithError { error } = &events[1] else {
            panic!("expected an error stop, got {events:?}");
        };
        assert!(error.contains("line49"), "{error}");
        assert!(error.contains("bad\u{FFFD}"), "{error}");
        assert!(!error.contains("line29"), "{error}");
    }

    #[test]
    fn test_push_bounded_keeps_last_lines() {
        let mut tail = VecDeque::new();
        for line in ["a", "b", "c"] {
            push_bounded(&mut tail, line.to_string(), 2);
        }
        assert_eq!(Vec::from(tail), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_decode_line_strips_carriage_return() {
        assert_eq!(decode_line(b"done\r"), "done");
        assert_eq!(decode_line(b"caf\xe9"), "caf\u{FFFD}");
    }
}
