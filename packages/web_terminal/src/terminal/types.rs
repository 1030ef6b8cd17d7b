use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;

use pty_manager::PtyError;

/// Access-class tag carried for external authorization. Not enforced here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalMode {
    #[default]
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "RO")]
    ReadOnly,
    /// student writeable only
    #[serde(rename = "ST")]
    StudentWrite,
    /// instructor writeable only
    #[serde(rename = "IN")]
    InstructorWrite,
}

/// Arguments of `create`, and one entry of a `set` target list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TerminalMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// Public fields of one terminal, as listed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub id: String,
    pub pid: u32,
    pub title: String,
    pub mode: TerminalMode,
    pub cols: u16,
    pub rows: u16,
}

/// Wire code for an unknown terminal id
pub const NO_SUCH_TERMINAL: u16 = 404;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("no such terminal: {0}")]
    NoSuchTerminal(String),

    #[error("terminal already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid terminal spec: {0}")]
    InvalidSpec(String),

    #[error("failed to spawn terminal: {0}")]
    Spawn(#[source] PtyError),

    #[error(transparent)]
    Pty(#[from] PtyError),
}

impl TerminalError {
    pub fn code(&self) -> u16 {
        match self {
            Self::NoSuchTerminal(_) => NO_SUCH_TERMINAL,
            Self::InvalidSpec(_) => 400,
            Self::AlreadyExists(_) => 409,
            Self::Spawn(_) | Self::Pty(_) => 500,
        }
    }

    /// Error value placed in callback args.
    ///
    /// Unknown ids serialize as the bare `{"code":404}` clients match on.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::NoSuchTerminal(_) => json!({ "code": NO_SUCH_TERMINAL }),
            other => json!({ "code": other.code(), "message": other.to_string() }),
        }
    }
}
