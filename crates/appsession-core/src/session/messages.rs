//! Outbound message construction.
//!
//! Configuration and theme are read through the session's `OptionSource`
//! each time a message is built.

use std::sync::OnceLock;

use appsession_types::{
    EnvironmentInfo, ForwardMsg, Initialize, NewSession, NewSessionConfig, ScriptFinishedStatus,
    SessionStatus, UserInfo,
};
use uuid::Uuid;

use super::{AppSession, SessionState};
use crate::config::SectionOptions;
use crate::theme::populate_custom_theme;

const DEFAULT_MAX_CACHED_MESSAGE_AGE: u32 = 2;

impl AppSession {
    pub(super) fn create_new_session_message(&self) -> ForwardMsg {
        let options = &self.collaborators.options;
        let server = options.options_for_section("server");
        let client = options.options_for_section("client");

        ForwardMsg::NewSession(NewSession {
            script_run_id: generate_script_run_id(),
            name: self.script.name(),
            main_script_path: self.script.path().display().to_string(),
            config: NewSessionConfig {
                allow_run_on_save: option_bool(&server, "allow_run_on_save", true),
                max_cached_message_age: option_u32(
                    &server,
                    "max_cached_message_age",
                    DEFAULT_MAX_CACHED_MESSAGE_AGE,
                ),
            },
            custom_theme: populate_custom_theme(&options.options_for_section("theme")),
            initialize: Initialize {
                user_info: UserInfo {
                    installation_id: installation_id().to_string(),
                    email: option_str(&client, "email"),
                },
                environment_info: EnvironmentInfo {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    platform: std::env::consts::OS.to_string(),
                },
                session_status: self.session_status(),
                command_line: self.script.command_line.clone(),
                session_id: self.id.to_string(),
            },
        })
    }

    pub(super) fn create_session_state_changed_message(&self) -> ForwardMsg {
        ForwardMsg::SessionStateChanged(self.session_status())
    }

    fn session_status(&self) -> SessionStatus {
        SessionStatus {
            run_on_save: self.run_on_save,
            script_is_running: self.state == SessionState::AppIsRunning,
            session_state: self.session_state.snapshot(),
        }
    }
}

pub(super) fn script_finished(status: ScriptFinishedStatus, error: Option<String>) -> ForwardMsg {
    ForwardMsg::ScriptFinished { status, error }
}

fn generate_script_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Identifies this process to clients; stable for the process lifetime.
fn installation_id() -> &'static str {
    static ID: OnceLock<String> = OnceLock::new();
    ID.get_or_init(|| Uuid::new_v4().to_string())
}

pub(super) fn option_bool(options: &SectionOptions, key: &str, default: bool) -> bool {
    options
        .get(key)
        .and_then(toml::Value::as_bool)
        .unwrap_or(default)
}

fn option_u32(options: &SectionOptions, key: &str, default: u32) -> u32 {
    options
        .get(key)
        .and_then(toml::Value::as_integer)
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(default)
}

fn option_str(options: &SectionOptions, key: &str) -> Option<String> {
    options
        .get(key)
        .and_then(toml::Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
