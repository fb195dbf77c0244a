//! Session controller for interactive script runs.
//!
//! `session::AppSession` owns one client session and serializes worker
//! events, client requests and file changes onto a single control loop.
//! The other modules provide the collaborators it is wired to.

pub mod caches;
pub mod config;
pub mod logging;
pub mod queue;
pub mod session;
pub mod signal;
pub mod state_store;
pub mod theme;
pub mod uploads;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use session::{AppSession, Collaborators, ScriptInfo, SessionId, SessionState};
