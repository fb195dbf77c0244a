//! Wire types shared by the session controller and its transports.
//!
//! - `forward`: outbound messages delivered to the client
//! - `back`: client-originated control messages
//! - `rerun`: client state snapshots and rerun requests
//! - `theme`: custom theme record carried by the new-session message

pub mod back;
pub mod forward;
pub mod rerun;
pub mod theme;

pub use back::BackMsg;
pub use forward::{
    EnvironmentInfo, ExceptionReport, ForwardMsg, Initialize, NewSession, NewSessionConfig,
    ScriptFinishedStatus, SessionStatus, UserInfo,
};
pub use rerun::{ClientState, RerunData, WidgetStates};
pub use theme::CustomTheme;
