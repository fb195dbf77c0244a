//! Client-originated control messages.

use serde::{Deserialize, Serialize};

use crate::rerun::ClientState;

/// A control message sent by the client to its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackMsg {
    /// Re-execute the script with the client's current widget state.
    RerunScript(ClientState),

    /// Stop the running script, if any.
    StopScript,

    /// Drop the session state and every registered cache.
    ClearCache,

    /// Toggle automatic reruns when the script source changes.
    SetRunOnSave { run_on_save: bool },
}
