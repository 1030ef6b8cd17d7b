//! Control channel protocol.
//!
//! Inbound messages are decoded into the closed [`Command`] set; any other
//! `type` is refused. Each control connection owns one queue drained by a
//! single worker, so its commands run strictly in arrival order.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::manager::TerminalManager;
use super::types::{TerminalError, TerminalRecord, TerminalSpec};
use crate::socket::{Envelope, Responder, Socket};

/// Every `type` the control channel accepts
pub const COMMAND_TYPES: &[&str] = &["list", "create", "destroy", "size", "resize", "rename", "set"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    List,
    Create(TerminalSpec),
    Destroy {
        id: String,
    },
    #[serde(alias = "resize")]
    Size {
        id: String,
        cols: u16,
        rows: u16,
    },
    Rename {
        id: String,
        title: String,
    },
    Set {
        #[serde(default)]
        terminals: Vec<TerminalSpec>,
    },
}

impl Command {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, CommandError> {
        let kind = envelope.kind.as_deref().unwrap_or_default();
        if !COMMAND_TYPES.contains(&kind) {
            return Err(CommandError::UnknownCommand(kind.to_string()));
        }
        serde_json::from_value(envelope.to_value()).map_err(CommandError::InvalidCommand)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("invalid command: {0}")]
    InvalidCommand(#[source] serde_json::Error),

    #[error(transparent)]
    Terminal(#[from] TerminalError),
}

impl CommandError {
    /// Error value placed in callback args
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Terminal(e) => e.to_wire(),
            other => json!({ "code": 400, "message": other.to_string() }),
        }
    }
}

/// Broadcasts sent to every control connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ControlEvent {
    List(Vec<TerminalRecord>),
    Rename { id: String, title: String },
}

/// Run one command: mutate, broadcast the new state to the group, and
/// return the callback result. Failures broadcast nothing.
pub async fn dispatch(
    manager: &TerminalManager,
    socket: &Socket,
    command: Command,
) -> Result<Value, CommandError> {
    let result = match command {
        Command::List => {
            let terminals = manager.list().await;
            broadcast(socket, &ControlEvent::List(terminals.clone()));
            json!(terminals)
        }
        Command::Create(spec) => {
            let record = manager.create(spec).await?;
            broadcast_list(manager, socket).await;
            json!(record)
        }
        Command::Destroy { id } => {
            manager.destroy(&id).await?;
            broadcast_list(manager, socket).await;
            json!({ "id": id })
        }
        Command::Size { id, cols, rows } => {
            manager.resize(&id, cols, rows).await?;
            broadcast_list(manager, socket).await;
            json!({ "id": id, "cols": cols, "rows": rows })
        }
        Command::Rename { id, title } => {
            manager.rename(&id, title.clone()).await?;
            broadcast(
                socket,
                &ControlEvent::Rename {
                    id: id.clone(),
                    title: title.clone(),
                },
            );
            json!({ "id": id, "title": title })
        }
        Command::Set { terminals } => {
            let terminals = manager.set(terminals).await?;
            broadcast(socket, &ControlEvent::List(terminals.clone()));
            json!(terminals)
        }
    };
    Ok(result)
}

async fn broadcast_list(manager: &TerminalManager, socket: &Socket) {
    let terminals = manager.list().await;
    broadcast(socket, &ControlEvent::List(terminals));
}

fn broadcast(socket: &Socket, event: &ControlEvent) {
    if let Err(e) = socket.send(event) {
        warn!(socket = %socket.id(), "Failed to broadcast: {}", e);
    }
}

struct Job {
    command: Result<Command, CommandError>,
    /// `None` for the implicit hello
    responder: Option<Responder>,
}

/// Wire a control connection to `manager`.
///
/// Queues an implicit `list` (answered by broadcast only), then every decoded
/// message in arrival order. Once the socket closes nothing further is
/// dispatched; a command already running finishes.
pub fn attach_control(manager: Arc<TerminalManager>, socket: &Arc<Socket>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    let _ = tx.send(Job {
        command: Ok(Command::List),
        responder: None,
    });

    let queue = tx.clone();
    socket.listen(move |envelope, responder| {
        let _ = queue.send(Job {
            command: Command::from_envelope(&envelope),
            responder: Some(responder),
        });
    });
    drop(tx);

    let socket = socket.clone();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if socket.is_closed() {
                break;
            }

            let result = match job.command {
                Ok(command) => {
                    debug!(socket = %socket.id(), "Dispatching {:?}", command);
                    dispatch(&manager, &socket, command).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                debug!(socket = %socket.id(), "Command failed: {}", e);
            }

            if let Some(responder) = job.responder {
                let args = match result {
                    Ok(value) => vec![Value::Null, value],
                    Err(e) => vec![e.to_wire()],
                };
                responder.respond(args);
            }
        }
        debug!(socket = %socket.id(), "Control worker stopped");
    });
}
