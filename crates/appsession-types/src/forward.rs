//! Outbound message types.
//!
//! Every message the session hands to its transport is a `ForwardMsg`.
//! Messages are immutable once enqueued and serialize to tagged JSON so a
//! transport can frame them however it likes.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::theme::CustomTheme;

/// A message delivered from the session to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForwardMsg {
    /// Announces a fresh script run and carries the session framing.
    NewSession(NewSession),

    /// The session's run status or script-visible state changed.
    SessionStateChanged(SessionStatus),

    /// A script run ended.
    ScriptFinished {
        status: ScriptFinishedStatus,
        /// Error detail when `status` is `Error`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A backend-side failure, reported to the client for display.
    Exception(ExceptionReport),

    /// Script output produced by the worker, forwarded verbatim.
    Delta { payload: Value },
}

impl ForwardMsg {
    /// Short, stable name of the message kind (for logs).
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardMsg::NewSession(_) => "new_session",
            ForwardMsg::SessionStateChanged(_) => "session_state_changed",
            ForwardMsg::ScriptFinished { .. } => "script_finished",
            ForwardMsg::Exception(_) => "exception",
            ForwardMsg::Delta { .. } => "delta",
        }
    }
}

/// Outcome carried by `ForwardMsg::ScriptFinished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFinishedStatus {
    Success,
    Error,
}

impl fmt::Display for ScriptFinishedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptFinishedStatus::Success => write!(f, "success"),
            ScriptFinishedStatus::Error => write!(f, "error"),
        }
    }
}

/// Payload of `ForwardMsg::NewSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    /// Identifier of the run this announcement opens.
    pub script_run_id: String,
    /// Display name of the app (the script file stem).
    pub name: String,
    pub main_script_path: String,
    /// Snapshot of the client-relevant configuration.
    pub config: NewSessionConfig,
    /// Present only when at least one theme option is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_theme: Option<CustomTheme>,
    pub initialize: Initialize,
}

/// Client-relevant configuration snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSessionConfig {
    pub allow_run_on_save: bool,
    pub max_cached_message_age: u32,
}

/// Static session metadata sent with every new-session message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initialize {
    pub user_info: UserInfo,
    pub environment_info: EnvironmentInfo,
    pub session_status: SessionStatus,
    pub command_line: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub installation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub version: String,
    pub platform: String,
}

/// Run status plus a snapshot of the script-visible session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub run_on_save: bool,
    pub script_is_running: bool,
    #[serde(default)]
    pub session_state: BTreeMap<String, Value>,
}

/// Error description shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionReport {
    pub type_name: String,
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ExceptionReport {
    /// Flattens an error and its `source()` chain into a report.
    pub fn from_error(type_name: impl Into<String>, error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            type_name: type_name.into(),
            message: error.to_string(),
            causes,
        }
    }
}
