//! Session controller.
//!
//! `AppSession` owns one client's session: the script-visible state store,
//! the output queue, and at most one active worker. Everything that can
//! happen off the control loop (worker events, file changes, backend
//! failures) is posted to the session's inbox and acted on only when the
//! owner calls `process_pending` or `run_pending`.
//!
//! Structure:
//! - `mod.rs`: `AppSession`, lifecycle and request handling
//! - `inbox.rs`: control-loop message types
//! - `messages.rs`: construction of outbound messages

mod inbox;
mod messages;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use appsession_types::{
    BackMsg, ClientState, ExceptionReport, ForwardMsg, RerunData, ScriptFinishedStatus,
};
pub(crate) use inbox::{ControlMsg, ControlReceiver, ControlSender};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::caches::CacheRegistry;
use crate::config::OptionSource;
use crate::queue::{ForwardMsgQueue, OutboundQueue};
use crate::signal::{FileChangeSignal, SubscriptionId};
use crate::state_store::SessionStateStore;
use crate::uploads::UploadedFileStore;
use crate::worker::{
    ScriptEvent, ScriptWorker, WorkerContext, WorkerEvent, WorkerEventSender, WorkerFactory,
    WorkerId, WorkerSeq,
};

/// Unique identity of a session, generated at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle. `ShutdownRequested` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AppNotRunning,
    AppIsRunning,
    ShutdownRequested,
}

/// The script a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    pub main_script_path: PathBuf,
    /// Command line the app was launched with, echoed to the client.
    pub command_line: String,
}

impl ScriptInfo {
    pub fn new(main_script_path: impl Into<PathBuf>, command_line: impl Into<String>) -> Self {
        Self {
            main_script_path: main_script_path.into(),
            command_line: command_line.into(),
        }
    }

    /// Display name: the script's file stem.
    pub fn name(&self) -> String {
        self.main_script_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.main_script_path
    }
}

/// External capabilities a session depends on.
pub struct Collaborators {
    pub worker_factory: Arc<dyn WorkerFactory>,
    pub options: Arc<dyn OptionSource>,
    pub uploaded_files: Arc<dyn UploadedFileStore>,
    pub caches: CacheRegistry,
    pub source_changed: FileChangeSignal,
    pub secrets_changed: FileChangeSignal,
}

struct ActiveWorker {
    id: WorkerId,
    handle: Arc<dyn ScriptWorker>,
}

type EnqueueCallback = Box<dyn Fn() + Send>;

pub struct AppSession {
    id: SessionId,
    script: ScriptInfo,
    state: SessionState,
    session_state: SessionStateStore,
    client_state: ClientState,
    run_on_save: bool,
    worker: Option<ActiveWorker>,
    worker_seq: WorkerSeq,
    queue: Box<dyn OutboundQueue>,
    on_enqueued: Option<EnqueueCallback>,
    collaborators: Collaborators,
    subscriptions: Vec<(FileChangeSignal, SubscriptionId)>,
    control_tx: ControlSender,
    control_rx: ControlReceiver,
}

impl AppSession {
    /// Creates a session and subscribes it to the file-change signals.
    pub fn new(script: ScriptInfo, collaborators: Collaborators) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let server = collaborators.options.options_for_section("server");
        let run_on_save = messages::option_bool(&server, "run_on_save", false);

        let subscriptions = vec![
            subscribe(&collaborators.source_changed, &control_tx, || {
                ControlMsg::SourceFileChanged
            }),
            subscribe(&collaborators.secrets_changed, &control_tx, || {
                ControlMsg::SecretsFileChanged
            }),
        ];

        let session = Self {
            id: SessionId::new(),
            script,
            state: SessionState::AppNotRunning,
            session_state: SessionStateStore::new(),
            client_state: ClientState::default(),
            run_on_save,
            worker: None,
            worker_seq: WorkerSeq::default(),
            queue: Box::new(ForwardMsgQueue::new()),
            on_enqueued: None,
            collaborators,
            subscriptions,
            control_tx,
            control_rx,
        };
        info!(session = %session.id, script = %session.script.path().display(), "Session created");
        session
    }

    /// Replaces the output queue.
    #[must_use]
    pub fn with_queue(mut self, queue: Box<dyn OutboundQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Registers a callback invoked on the control loop after each enqueue.
    #[must_use]
    pub fn on_message_enqueued(mut self, callback: impl Fn() + Send + 'static) -> Self {
        self.on_enqueued = Some(Box::new(callback));
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn script(&self) -> &ScriptInfo {
        &self.script
    }

    pub fn session_state(&self) -> &SessionStateStore {
        &self.session_state
    }

    pub fn client_state(&self) -> &ClientState {
        &self.client_state
    }

    pub fn run_on_save(&self) -> bool {
        self.run_on_save
    }

    /// True while a worker is addressed by this session.
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn queue(&self) -> &dyn OutboundQueue {
        self.queue.as_ref()
    }

    /// Drains the output queue for the transport.
    pub fn flush(&mut self) -> Vec<ForwardMsg> {
        self.queue.flush()
    }

    // ========================================================================
    // Reruns and worker lifecycle
    // ========================================================================

    /// Requests a (re)run of the script.
    ///
    /// The active worker gets the first chance to absorb the request. A
    /// worker is created when there is none or the current one refuses.
    pub fn request_rerun(&mut self, client_state: Option<ClientState>) {
        if self.state == SessionState::ShutdownRequested {
            warn!(session = %self.id, "Rerun requested after shutdown; ignoring");
            return;
        }

        let data = client_state.map(RerunData::from).unwrap_or_default();

        if let Some(active) = &self.worker {
            if active.handle.request_rerun(data.clone()) {
                debug!(session = %self.id, worker = %active.id, "Worker accepted rerun");
                return;
            }
            debug!(session = %self.id, worker = %active.id, "Worker refused rerun; replacing");
        }

        self.create_worker(data);
    }

    fn create_worker(&mut self, data: RerunData) {
        let id = self.worker_seq.next_id();
        let ctx = WorkerContext {
            worker_id: id,
            session_id: self.id.clone(),
            script: self.script.clone(),
            session_state: self.session_state.clone(),
            client_state: self.client_state.clone(),
            initial_rerun_data: data,
            events: WorkerEventSender::new(id, self.control_tx.clone()),
        };

        let handle = self.collaborators.worker_factory.create(ctx);
        // Replacing the handle makes the previous worker stale.
        self.worker = Some(ActiveWorker {
            id,
            handle: Arc::clone(&handle),
        });
        debug!(session = %self.id, worker = %id, "Worker created");
        handle.start();
    }

    // ========================================================================
    // Control loop
    // ========================================================================

    /// Handles every message already in the inbox. Returns how many were
    /// handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.control_rx.try_recv() {
            self.dispatch(msg);
            handled += 1;
        }
        handled
    }

    /// Waits for at least one inbox message, then drains the rest.
    pub async fn run_pending(&mut self) -> usize {
        let Some(msg) = self.control_rx.recv().await else {
            return 0;
        };
        self.dispatch(msg);
        1 + self.process_pending()
    }

    fn dispatch(&mut self, msg: ControlMsg) {
        debug!(session = %self.id, msg = msg.name(), "Control message");
        match msg {
            ControlMsg::Worker(event) => self.handle_worker_event(event),
            ControlMsg::BackendException { error, was_running } => {
                self.on_backend_exception(&error, was_running);
            }
            ControlMsg::SourceFileChanged => self.on_source_file_changed(),
            ControlMsg::SecretsFileChanged => self.on_secrets_file_changed(),
        }
    }

    fn handle_worker_event(&mut self, WorkerEvent { worker, event }: WorkerEvent) {
        if self.worker.as_ref().map(|active| active.id) != Some(worker) {
            debug!(session = %self.id, %worker, event = event.name(), "Dropping event from stale worker");
            return;
        }

        match event {
            ScriptEvent::EnqueueForwardMsg(msg) => self.enqueue_forward_msg(msg),
            ScriptEvent::ScriptStarted => {
                self.set_state(SessionState::AppIsRunning);
                let new_session = self.create_new_session_message();
                self.enqueue_forward_msg(new_session);
                let delta = self.create_session_state_changed_message();
                self.enqueue_forward_msg(delta);
            }
            ScriptEvent::ScriptStoppedWithSuccess => {
                self.on_script_stopped(ScriptFinishedStatus::Success, None);
            }
            ScriptEvent::ScriptStoppedWithError { error } => {
                self.on_script_stopped(ScriptFinishedStatus::Error, Some(error));
            }
            ScriptEvent::Shutdown => {
                debug!(session = %self.id, %worker, "Worker shut down");
                self.worker = None;
            }
        }
    }

    fn on_script_stopped(&mut self, status: ScriptFinishedStatus, error: Option<String>) {
        self.set_state(SessionState::AppNotRunning);
        if let Some(error) = &error {
            warn!(session = %self.id, %error, "Script finished with error");
        }
        self.enqueue_forward_msg(messages::script_finished(status, error));
        let delta = self.create_session_state_changed_message();
        self.enqueue_forward_msg(delta);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == SessionState::ShutdownRequested {
            return;
        }
        if self.state != next {
            debug!(session = %self.id, from = ?self.state, to = ?next, "Session state changed");
        }
        self.state = next;
    }

    fn enqueue_forward_msg(&mut self, msg: ForwardMsg) {
        if self.state == SessionState::ShutdownRequested {
            debug!(session = %self.id, kind = msg.kind(), "Dropping message after shutdown");
            return;
        }
        self.queue.enqueue(msg);
        if let Some(callback) = &self.on_enqueued {
            callback();
        }
    }

    // ========================================================================
    // Client requests
    // ========================================================================

    /// Reports a failure in the backend channel. Safe to call from any
    /// state; the messages are produced on the control loop.
    pub fn handle_backmsg_exception(&self, error: anyhow::Error) {
        let was_running = self.state == SessionState::AppIsRunning;
        let _ = self
            .control_tx
            .send(ControlMsg::BackendException { error, was_running });
    }

    fn on_backend_exception(&mut self, error: &anyhow::Error, was_running: bool) {
        if self.state == SessionState::ShutdownRequested {
            return;
        }
        warn!(session = %self.id, error = %format!("{error:#}"), was_running, "Backend exception");

        // The backend failed, not the script.
        self.enqueue_forward_msg(messages::script_finished(ScriptFinishedStatus::Success, None));

        if was_running {
            // The client's view of the run is unknown; resync from scratch.
            self.queue.clear();
            let new_session = self.create_new_session_message();
            self.enqueue_forward_msg(new_session);
        }

        let delta = self.create_session_state_changed_message();
        self.enqueue_forward_msg(delta);

        let type_name = if error.downcast_ref::<serde_json::Error>().is_some() {
            "DecodeError"
        } else {
            "BackendError"
        };
        let report = ExceptionReport::from_error(type_name, &**error);
        self.enqueue_forward_msg(ForwardMsg::Exception(report));
    }

    /// Empties the session state store and every registered cache.
    pub fn handle_clear_cache_request(&mut self) {
        info!(session = %self.id, "Clearing caches");
        self.session_state.clear();
        self.collaborators.caches.clear_all();
    }

    pub fn handle_set_run_on_save_request(&mut self, run_on_save: bool) {
        let allowed = messages::option_bool(
            &self.collaborators.options.options_for_section("server"),
            "allow_run_on_save",
            true,
        );
        if !allowed {
            warn!(session = %self.id, "Client tried to toggle run-on-save, but it is not allowed");
            return;
        }
        self.run_on_save = run_on_save;
        let delta = self.create_session_state_changed_message();
        self.enqueue_forward_msg(delta);
    }

    pub fn handle_stop_script_request(&mut self) {
        if let Some(active) = &self.worker {
            debug!(session = %self.id, worker = %active.id, "Stop requested by client");
            active.handle.request_stop();
        }
    }

    /// Routes one decoded client message.
    pub fn handle_backmsg(&mut self, msg: BackMsg) {
        match msg {
            BackMsg::RerunScript(client_state) => {
                self.client_state = client_state.clone();
                self.request_rerun(Some(client_state));
            }
            BackMsg::StopScript => self.handle_stop_script_request(),
            BackMsg::ClearCache => self.handle_clear_cache_request(),
            BackMsg::SetRunOnSave { run_on_save } => {
                self.handle_set_run_on_save_request(run_on_save);
            }
        }
    }

    /// Decodes and routes a JSON client message. Decode failures are
    /// reported to the client through the backend-exception path.
    pub fn handle_backmsg_json(&mut self, raw: &str) {
        match decode_backmsg(raw) {
            Ok(msg) => self.handle_backmsg(msg),
            Err(err) => self.handle_backmsg_exception(err),
        }
    }

    fn on_source_file_changed(&mut self) {
        if self.run_on_save {
            info!(session = %self.id, "Script changed; rerunning");
            self.request_rerun(Some(self.client_state.clone()));
        } else {
            debug!(session = %self.id, "Script changed; run-on-save is off");
        }
    }

    fn on_secrets_file_changed(&mut self) {
        info!(session = %self.id, "Secrets changed; rerunning");
        self.request_rerun(Some(self.client_state.clone()));
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stops the worker and releases session resources. Only the first call
    /// has any effect.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::ShutdownRequested {
            return;
        }
        info!(session = %self.id, "Shutting down session");

        if let Some(active) = &self.worker {
            active.handle.request_stop();
        }

        self.collaborators
            .uploaded_files
            .remove_session_files(&self.id);

        self.disconnect_signals();

        self.state = SessionState::ShutdownRequested;
    }

    fn disconnect_signals(&mut self) {
        for (signal, id) in self.subscriptions.drain(..) {
            signal.disconnect(id);
        }
    }
}

impl Drop for AppSession {
    // Signals outlive the session; a dropped session must not stay connected.
    fn drop(&mut self) {
        self.disconnect_signals();
    }
}

impl fmt::Debug for AppSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("worker", &self.worker.as_ref().map(|active| active.id))
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// Connects `signal` so each change posts `make()` to the inbox.
fn subscribe(
    signal: &FileChangeSignal,
    tx: &ControlSender,
    make: fn() -> ControlMsg,
) -> (FileChangeSignal, SubscriptionId) {
    let tx = tx.clone();
    let id = signal.connect(move || {
        let _ = tx.send(make());
    });
    (signal.clone(), id)
}

fn decode_backmsg(raw: &str) -> Result<BackMsg> {
    Ok(serde_json::from_str(raw)?)
}
