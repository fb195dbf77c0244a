//! Script worker contract.
//!
//! A worker runs the user's script on its own thread or task and reports
//! progress as `ScriptEvent`s. Every event is stamped with the emitting
//! worker's `WorkerId` so the session can drop events from workers it has
//! already replaced.
//!
//! - `requests`: worker-side rerun/stop arbitration
//! - `process`: a worker that runs the script as a child process

pub mod process;
pub mod requests;

use std::fmt;
use std::sync::Arc;

use appsession_types::{ClientState, ForwardMsg, RerunData};

use crate::session::{ControlMsg, ControlSender, ScriptInfo, SessionId};
use crate::state_store::SessionStateStore;

/// Identity of one worker within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Default)]
pub(crate) struct WorkerSeq {
    next: u64,
}

impl WorkerSeq {
    pub(crate) fn next_id(&mut self) -> WorkerId {
        self.next = self.next.wrapping_add(1);
        WorkerId(self.next)
    }
}

/// Lifecycle events emitted by a worker, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEvent {
    /// A script run began.
    ScriptStarted,

    /// The run ended normally (or was cut short for a rerun).
    ScriptStoppedWithSuccess,

    /// The run failed.
    ScriptStoppedWithError { error: String },

    /// Script output to forward to the client unchanged.
    EnqueueForwardMsg(ForwardMsg),

    /// The worker exited and will emit nothing further.
    Shutdown,
}

impl ScriptEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptEvent::ScriptStarted => "script_started",
            ScriptEvent::ScriptStoppedWithSuccess => "script_stopped_with_success",
            ScriptEvent::ScriptStoppedWithError { .. } => "script_stopped_with_error",
            ScriptEvent::EnqueueForwardMsg(_) => "enqueue_forward_msg",
            ScriptEvent::Shutdown => "shutdown",
        }
    }
}

/// A `ScriptEvent` tagged with the worker that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub worker: WorkerId,
    pub event: ScriptEvent,
}

/// Handed to a worker at creation; posts its events onto the session's
/// control loop. Safe to use from any thread.
#[derive(Debug, Clone)]
pub struct WorkerEventSender {
    worker: WorkerId,
    tx: ControlSender,
}

impl WorkerEventSender {
    pub(crate) fn new(worker: WorkerId, tx: ControlSender) -> Self {
        Self { worker, tx }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// Posts `event` to the control loop without running any session logic.
    /// Returns false once the session is gone.
    pub fn emit(&self, event: ScriptEvent) -> bool {
        self.tx
            .send(ControlMsg::Worker(WorkerEvent {
                worker: self.worker,
                event,
            }))
            .is_ok()
    }
}

/// Handle to a running (or runnable) worker.
pub trait ScriptWorker: Send + Sync {
    /// Begins executing the initial rerun request.
    fn start(&self);

    /// Asks the worker to stop. Returns immediately.
    fn request_stop(&self);

    /// Offers a new request to the worker. Returns false when the worker can
    /// no longer accept input (e.g. it is stopping).
    fn request_rerun(&self, data: RerunData) -> bool;
}

/// Everything a worker needs from its session.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker_id: WorkerId,
    pub session_id: SessionId,
    pub script: ScriptInfo,
    pub session_state: SessionStateStore,
    pub client_state: ClientState,
    pub initial_rerun_data: RerunData,
    pub events: WorkerEventSender,
}

/// Creates workers for a session.
pub trait WorkerFactory: Send + Sync {
    fn create(&self, ctx: WorkerContext) -> Arc<dyn ScriptWorker>;
}
