//! Socket layer
//!
//! Wraps one WebSocket connection and gives it:
//! - membership in a broadcast [`Group`]
//! - a ping/pong liveness heartbeat
//! - JSON envelopes with callback correlation ([`Socket::listen`])
//! - raw point-to-point streaming ([`Socket::listen_raw`], [`Socket::send_direct`])

mod connection;
mod envelope;
mod error;
mod frame;
mod group;

pub use connection::{Socket, Subscription};
pub use envelope::{CALLBACK_TYPE, CallbackMessage, Envelope, Responder};
pub use error::SocketError;
pub use frame::{CloseReason, Frame};
pub use group::{Group, SocketId};

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default interval between liveness pings
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one upgraded WebSocket for its whole life.
///
/// Joins `group`, starts the heartbeat, lets `setup` register listeners and
/// close handlers, then pumps inbound frames until either side closes.
/// Nothing is read before `setup` completes. Teardown runs exactly once on
/// the way out.
pub async fn serve<F, Fut>(ws: WebSocket, group: Group, heartbeat: Duration, setup: F)
where
    F: FnOnce(Arc<Socket>) -> Fut,
    Fut: Future<Output = ()>,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (socket, mut outbound) = Socket::new(group);

    if let Err(e) = socket.join() {
        warn!("Refusing socket: {}", e);
        return;
    }
    info!(socket = %socket.id(), "Socket opened ({} in group)", socket.group().len());

    // Task to send frames to the WebSocket
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let closing = matches!(frame, Frame::Close(_));
            if ws_sender.send(Message::from(frame)).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    socket.start_heartbeat(heartbeat);
    setup(socket.clone()).await;

    let closing = socket.closing_token();
    loop {
        tokio::select! {
            _ = closing.cancelled() => break,
            msg = ws_receiver.next() => match msg {
                Some(Ok(msg)) => {
                    if socket.handle_frame(Frame::from(msg)).is_break() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(socket = %socket.id(), "WebSocket error: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    socket.teardown();
    info!(socket = %socket.id(), "Socket closed");

    // Let the close frame (and anything queued before it) flush
    if tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .is_err()
    {
        debug!(socket = %socket.id(), "Writer did not finish flushing");
    }
}
