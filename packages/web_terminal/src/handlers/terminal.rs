use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use tracing::info;

use crate::AppState;
use crate::socket::{self, CloseReason, Group};
use crate::terminal::attach_control;

/// Close code sent when a direct connection names an unknown terminal
pub const CLOSE_NO_SUCH_TERMINAL: u16 = 4404;

/// Control channel: every connection of this router shares one group
pub async fn control_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let manager = state.manager.clone();
    let group = state.control_group.clone();

    ws.on_upgrade(move |ws| {
        socket::serve(ws, group, state.heartbeat, move |socket| async move {
            attach_control(manager, &socket);
        })
    })
}

/// Direct session channel: raw output of one terminal, input written back to it
pub async fn connect_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let manager = state.manager.clone();

    // Point to point: a group of its own
    ws.on_upgrade(move |ws| {
        socket::serve(ws, Group::new(), state.heartbeat, move |socket| async move {
            if let Err(e) = manager.connect_direct(&id, &socket).await {
                info!(terminal = %id, "Refusing direct connection: {}", e);
                socket.close(Some(CloseReason {
                    code: CLOSE_NO_SUCH_TERMINAL,
                    reason: e.to_wire().to_string(),
                }));
            }
        })
    })
}
