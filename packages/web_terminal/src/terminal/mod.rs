//! Terminal sessions
//!
//! [`TerminalManager`] owns every PTY process together with its replayable
//! [`OutputLog`]. Terminals outlive the connections that created or view
//! them; only `destroy`, `set` or server shutdown end a process.

pub mod control;
mod decoder;
mod manager;
mod session;
mod types;

pub use control::{Command, CommandError, ControlEvent, attach_control};
pub use manager::{TerminalDefaults, TerminalManager};
pub use session::OutputLog;
pub use types::{NO_SUCH_TERMINAL, TerminalError, TerminalMode, TerminalRecord, TerminalSpec};
