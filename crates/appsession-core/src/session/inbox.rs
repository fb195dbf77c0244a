//! Control-loop inbox.
//!
//! Workers, file-change subscribers and the backend-exception hook only post
//! a `ControlMsg` here. The session drains the inbox on its own loop, so
//! nothing these senders do runs session logic on their thread.

use tokio::sync::mpsc;

use crate::worker::WorkerEvent;

/// Deferred work for the control loop.
#[derive(Debug)]
pub(crate) enum ControlMsg {
    /// A lifecycle event from some worker (current or superseded).
    Worker(WorkerEvent),

    /// A backend-channel failure. `was_running` is the session state at the
    /// time the failure was reported.
    BackendException {
        error: anyhow::Error,
        was_running: bool,
    },

    /// The main script changed on disk.
    SourceFileChanged,

    /// The secrets file changed on disk.
    SecretsFileChanged,
}

impl ControlMsg {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ControlMsg::Worker(event) => event.event.name(),
            ControlMsg::BackendException { .. } => "backend_exception",
            ControlMsg::SourceFileChanged => "source_file_changed",
            ControlMsg::SecretsFileChanged => "secrets_file_changed",
        }
    }
}

pub(crate) type ControlSender = mpsc::UnboundedSender<ControlMsg>;
pub(crate) type ControlReceiver = mpsc::UnboundedReceiver<ControlMsg>;
