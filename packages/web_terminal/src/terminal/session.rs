use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use pty_manager::{PtyActor, PtyConfig, PtyHandle, PtyOutputStream};

use super::decoder::Utf8StreamDecoder;
use super::types::{TerminalError, TerminalMode, TerminalRecord};
use crate::socket::{Socket, SocketId};

/// Replayable transcript of one terminal plus the viewers streaming it.
///
/// Log and viewer set share one lock: attaching replays the whole log and
/// subscribes in a single step, so a viewer sees every chunk exactly once.
#[derive(Default)]
pub struct OutputLog {
    inner: Mutex<OutputLogInner>,
}

#[derive(Default)]
struct OutputLogInner {
    chunks: Vec<String>,
    viewers: Vec<Arc<Socket>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk and relay it to every attached viewer
    pub fn append(&self, chunk: String) {
        let mut inner = self.inner.lock();
        inner.viewers.retain(|viewer| viewer.send_direct(chunk.clone()));
        inner.chunks.push(chunk);
    }

    /// Replay the full log to `viewer`, then keep it subscribed to new output.
    ///
    /// Returns the number of replayed chunks.
    pub fn attach(&self, viewer: Arc<Socket>) -> usize {
        let mut inner = self.inner.lock();
        for chunk in &inner.chunks {
            viewer.send_direct(chunk.clone());
        }
        let replayed = inner.chunks.len();
        if !inner.viewers.iter().any(|v| v.id() == viewer.id()) {
            inner.viewers.push(viewer);
        }
        replayed
    }

    /// Stop relaying to one viewer. The log is untouched.
    pub fn detach(&self, id: SocketId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.viewers.len();
        inner.viewers.retain(|v| v.id() != id);
        inner.viewers.len() != before
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.lock().viewers.len()
    }

    /// Concatenated transcript in emission order
    pub fn transcript(&self) -> String {
        self.inner.lock().chunks.concat()
    }
}

/// One registry entry: metadata, the owning PTY process and its output log
pub(crate) struct TerminalSession {
    pub id: String,
    pub pid: u32,
    pub title: String,
    pub mode: TerminalMode,
    pub cols: u16,
    pub rows: u16,
    pub handle: PtyHandle,
    pub output: Arc<OutputLog>,
}

impl TerminalSession {
    /// Spawn the process and start pumping its output into a fresh log.
    ///
    /// `title` is only evaluated once the process is running.
    pub fn spawn(
        id: String,
        title: impl FnOnce() -> String,
        mode: TerminalMode,
        config: PtyConfig,
    ) -> Result<Self, TerminalError> {
        let (cols, rows) = (config.cols, config.rows);
        let (handle, stream) = PtyActor::spawn(config).map_err(TerminalError::Spawn)?;
        let title = title();
        let pid = handle.pid().unwrap_or_default();
        let output = Arc::new(OutputLog::new());

        tokio::spawn(pump_output(id.clone(), stream, output.clone()));
        info!(terminal = %id, pid, "Created terminal");

        Ok(Self {
            id,
            pid,
            title,
            mode,
            cols,
            rows,
            handle,
            output,
        })
    }

    pub fn record(&self) -> TerminalRecord {
        TerminalRecord {
            id: self.id.clone(),
            pid: self.pid,
            title: self.title.clone(),
            mode: self.mode,
            cols: self.cols,
            rows: self.rows,
        }
    }
}

async fn pump_output(id: String, mut stream: PtyOutputStream, output: Arc<OutputLog>) {
    let mut decoder = Utf8StreamDecoder::new();
    while let Some(chunk) = stream.recv().await {
        let text = decoder.decode(&chunk.data);
        if !text.is_empty() {
            output.append(text);
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        output.append(rest);
    }
    debug!(terminal = %id, "Terminal output ended");
}
