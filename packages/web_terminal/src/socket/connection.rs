use parking_lot::Mutex;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::envelope::{Envelope, Responder};
use super::error::SocketError;
use super::frame::{CloseReason, Frame};
use super::group::{Group, SocketId};

type RawListener = Arc<dyn Fn(&[u8]) + Send + Sync>;
type CloseHandler = Box<dyn FnOnce() + Send>;

/// One physical connection plus its membership in a broadcast [`Group`].
///
/// Outbound frames go into a single unbounded queue drained by the writer
/// task, so everything queued on this socket (its own direct sends, group
/// broadcasts, callbacks) reaches the peer in enqueue order.
pub struct Socket {
    id: SocketId,
    group: Group,
    tx: mpsc::UnboundedSender<Frame>,
    alive: AtomicBool,
    /// Cancelled as soon as the socket starts closing
    closing: CancellationToken,
    torn_down: AtomicBool,
    listeners: Mutex<Vec<(u64, RawListener)>>,
    next_listener: AtomicU64,
    close_handlers: Mutex<Vec<CloseHandler>>,
}

/// Registration returned by [`Socket::listen`] and [`Socket::listen_raw`]
pub struct Subscription {
    socket: Weak<Socket>,
    id: u64,
}

impl Subscription {
    /// Stop delivering frames to the handler
    pub fn unsubscribe(self) {
        if let Some(socket) = self.socket.upgrade() {
            socket.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Socket {
    /// Create a socket bound to `group` but not yet a member of it.
    ///
    /// Every frame meant for the peer is delivered to the returned receiver;
    /// inbound frames are fed with [`Socket::handle_frame`].
    pub fn new(group: Group) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Arc::new(Self {
            id: SocketId::next(),
            group,
            tx,
            alive: AtomicBool::new(true),
            closing: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            close_handlers: Mutex::new(Vec::new()),
        });
        (socket, rx)
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Succeeds while the channel is usable
    pub fn open(&self) -> Result<(), SocketError> {
        if self.is_closed() {
            Err(SocketError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Open the socket and register it in its group
    pub fn join(&self) -> Result<(), SocketError> {
        self.open()?;
        self.group.join(self.id, self.tx.clone());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    pub(crate) fn closing_token(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// Serialize once and deliver to every socket in the group.
    ///
    /// Returns the number of sockets the message was queued for.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<usize, SocketError> {
        let json = serde_json::to_string(message).map_err(SocketError::Encode)?;
        Ok(self.send_raw(json))
    }

    /// Deliver an already encoded text frame to every socket in the group
    pub fn send_raw(&self, text: impl Into<String>) -> usize {
        self.group.broadcast(&Frame::Text(text.into()))
    }

    /// Point-to-point delivery to this socket only. Returns `false` once closed.
    pub fn send_direct(&self, frame: impl Into<Frame>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(frame.into()).is_ok()
    }

    /// Decode every inbound frame as an [`Envelope`] and hand it to `handler`.
    ///
    /// Frames that fail to decode are logged and dropped; the connection stays open.
    pub fn listen<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(Envelope, Responder) + Send + Sync + 'static,
    {
        let tx = self.tx.clone();
        let id = self.id;
        self.listen_raw(move |data| match Envelope::decode(data) {
            Ok(envelope) => {
                let responder = Responder::new(tx.clone(), &envelope);
                handler(envelope, responder);
            }
            Err(e) => warn!(socket = %id, "Dropping inbound frame: {}", e),
        })
    }

    /// Hand every inbound text or binary payload to `handler` undecoded
    pub fn listen_raw<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        if !self.torn_down.load(Ordering::SeqCst) {
            self.listeners.lock().push((id, Arc::new(handler)));
        }
        Subscription {
            socket: Arc::downgrade(self),
            id,
        }
    }

    /// Run `handler` once when the socket is torn down (immediately if it already was)
    pub fn on_close<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut handlers = self.close_handlers.lock();
        if self.torn_down.load(Ordering::SeqCst) {
            drop(handlers);
            handler();
        } else {
            handlers.push(Box::new(handler));
        }
    }

    /// Send a close frame and stop reading. Local teardown follows even if
    /// the peer never acknowledges.
    pub fn close(&self, reason: Option<CloseReason>) {
        if self.closing.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Frame::Close(reason));
        self.closing.cancel();
    }

    /// Process one inbound frame. `Break` means the peer closed the channel.
    pub fn handle_frame(&self, frame: Frame) -> ControlFlow<()> {
        match frame {
            Frame::Text(text) => self.dispatch(text.as_bytes()),
            Frame::Binary(data) => self.dispatch(&data),
            Frame::Pong(_) => self.alive.store(true, Ordering::SeqCst),
            // The websocket layer answers pings on its own
            Frame::Ping(_) => {}
            Frame::Close(reason) => {
                debug!(socket = %self.id, "Peer closed: {:?}", reason);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn dispatch(&self, data: &[u8]) {
        // Handlers may (un)subscribe, so call them outside the lock
        let listeners: Vec<RawListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(data);
        }
    }

    /// Ping the peer every `period`; a peer that has not answered the
    /// previous ping by the next tick is force-closed.
    pub fn start_heartbeat(self: &Arc<Self>, period: Duration) {
        let socket = Arc::downgrade(self);
        let closing = self.closing.clone();
        let id = self.id;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = closing.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(socket) = socket.upgrade() else { break };
                        if !socket.alive.swap(false, Ordering::SeqCst) {
                            info!(socket = %id, "Heartbeat missed, closing connection");
                            socket.close(None);
                            break;
                        }
                        let _ = socket.tx.send(Frame::Ping(Vec::new()));
                    }
                }
            }
            debug!(socket = %id, "Heartbeat stopped");
        });
    }

    /// Leave the group, stop the heartbeat, release listeners and run close
    /// handlers. Only the first call has any effect.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close(None);
        self.group.leave(self.id);
        self.listeners.lock().clear();

        let handlers = std::mem::take(&mut *self.close_handlers.lock());
        for handler in handlers {
            handler();
        }
        debug!(socket = %self.id, "Socket torn down");
    }
}
