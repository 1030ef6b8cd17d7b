use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::frame::Frame;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a socket, process-wide
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SocketId(pub u64);

impl SocketId {
    pub(crate) fn next() -> Self {
        SocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

struct Member {
    id: SocketId,
    tx: mpsc::UnboundedSender<Frame>,
}

/// Broadcast domain: the ordered set of open sockets registered under one endpoint.
///
/// Cloning shares the same membership. Distinct `Group::new()` values never
/// share members.
#[derive(Clone, Default)]
pub struct Group {
    members: Arc<RwLock<Vec<Member>>>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn join(&self, id: SocketId, tx: mpsc::UnboundedSender<Frame>) {
        let mut members = self.members.write();
        if !members.iter().any(|m| m.id == id) {
            members.push(Member { id, tx });
        }
    }

    /// Remove a socket. Returns `false` if it was not a member.
    pub(crate) fn leave(&self, id: SocketId) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| m.id != id);
        members.len() != before
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Deliver a frame to every current member. Returns how many accepted it.
    ///
    /// The member list is snapshotted first; delivery happens outside the lock
    /// so join/leave never waits on a send.
    pub(crate) fn broadcast(&self, frame: &Frame) -> usize {
        let targets: Vec<mpsc::UnboundedSender<Frame>> =
            self.members.read().iter().map(|m| m.tx.clone()).collect();

        targets
            .iter()
            .filter(|tx| tx.send(frame.clone()).is_ok())
            .count()
    }
}
