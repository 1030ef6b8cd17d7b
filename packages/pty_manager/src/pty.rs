use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::PtyError;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(2);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for spawning a PTY
#[derive(Clone, Debug)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Applied on top of the inherited process environment, last entry wins
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
    /// Value exported as `TERM`
    pub term: String,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: "bash".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            rows: 24,
            cols: 80,
            term: "xterm-color".to_string(),
        }
    }
}

/// State of a PTY session
#[derive(Clone, Debug)]
pub struct PtyState {
    pub running: bool,
    pub pid: Option<u32>,
    pub command: String,
    pub args: Vec<String>,
    pub rows: u16,
    pub cols: u16,
}

/// One chunk of output read from the PTY master
#[derive(Clone, Debug)]
pub struct PtyOutput {
    pub data: Vec<u8>,
    pub timestamp: i64,
}

/// Ordered, lossless output of one PTY. Closes at EOF.
pub type PtyOutputStream = mpsc::UnboundedReceiver<PtyOutput>;

/// Messages that can be sent to the PTY actor
pub(crate) enum PtyMessage {
    WriteInput {
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<usize, PtyError>>,
    },
    Resize {
        rows: u16,
        cols: u16,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
    GetState {
        respond_to: oneshot::Sender<PtyState>,
    },
    Kill {
        signal: Option<String>,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
}

/// Handle to communicate with a PTY actor
#[derive(Clone)]
pub struct PtyHandle {
    sender: mpsc::Sender<PtyMessage>,
    pid: Option<u32>,
}

impl PtyHandle {
    /// OS process id of the child, captured at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write data to the PTY
    pub async fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::WriteInput {
                data: data.to_vec(),
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send write message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive write response".into()))?
    }

    /// Write a string to the PTY
    pub async fn write_str(&self, text: &str) -> Result<usize, PtyError> {
        self.write(text.as_bytes()).await
    }

    /// Resize the PTY
    pub async fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Resize {
                rows,
                cols,
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send resize message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive resize response".into()))?
    }

    /// Get the current state of the PTY
    pub async fn state(&self) -> Result<PtyState, PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send state message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive state response".into()))
    }

    /// Signal the PTY process. `None` means SIGTERM.
    pub async fn kill(&self, signal: Option<&str>) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Kill {
                signal: signal.map(|s| s.to_string()),
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ProcessExited)?;
        rx.await.map_err(|_| PtyError::ProcessExited)?
    }
}

/// The PTY actor that manages a single PTY session
pub struct PtyActor {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    state: PtyState,
    receiver: mpsc::Receiver<PtyMessage>,
}

impl PtyActor {
    /// Spawn a new PTY and return a handle to it together with its output stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: PtyConfig) -> Result<(PtyHandle, PtyOutputStream), PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::CreateFailed(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&config.command);
        for arg in &config.args {
            cmd.arg(arg);
        }

        if let Some(dir) = &config.working_dir {
            if !dir.is_dir() {
                return Err(PtyError::CreateFailed(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
            cmd.cwd(dir);
        }

        // CommandBuilder starts from the parent environment
        cmd.env("TERM", &config.term);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        info!(
            "Spawning PTY command: {} with args: {:?}",
            config.command, config.args
        );

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", config.command, e);
            PtyError::CreateFailed(e.to_string())
        })?;
        // The child holds its own copy of the slave; ours must go so EOF is seen on exit
        drop(pair.slave);

        let pid = child.process_id();
        info!("PTY process started with PID: {:?}", pid);

        let state = PtyState {
            running: true,
            pid,
            command: config.command.clone(),
            args: config.args.clone(),
            rows: config.rows,
            cols: config.cols,
        };

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::channel(32);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::CreateFailed(format!("Failed to clone PTY reader: {}", e)))?;

        let mut actor = Self {
            master: pair.master,
            writer: None,
            child,
            state,
            receiver: msg_rx,
        };

        // Blocking reads stay off the runtime
        std::thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        debug!("PTY EOF detected - process has exited");
                        break;
                    }
                    Ok(n) => {
                        let output = PtyOutput {
                            data: buffer[..n].to_vec(),
                            timestamp: chrono::Utc::now().timestamp_millis(),
                        };
                        if output_tx.send(output).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO is how Linux reports a hung-up master
                        debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
            debug!("PTY reader thread exiting");
        });

        tokio::spawn(async move {
            actor.run().await;
        });

        Ok((
            PtyHandle {
                sender: msg_tx,
                pid,
            },
            output_rx,
        ))
    }

    async fn run(&mut self) {
        debug!(
            "PTY actor started for command: {} with PID: {:?}",
            self.state.command, self.state.pid
        );

        // Take the writer immediately to keep the PTY stdin open
        match self.master.take_writer() {
            Ok(writer) => self.writer = Some(writer),
            Err(e) => error!("Failed to get PTY writer: {}", e),
        }

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                PtyMessage::WriteInput { data, respond_to } => {
                    let result = self.handle_write_input(&data);
                    let _ = respond_to.send(result);
                }
                PtyMessage::Resize {
                    rows,
                    cols,
                    respond_to,
                } => {
                    let result = self.handle_resize(rows, cols);
                    let _ = respond_to.send(result);
                }
                PtyMessage::GetState { respond_to } => {
                    if let Ok(Some(_)) = self.child.try_wait() {
                        self.state.running = false;
                    }
                    let _ = respond_to.send(self.state.clone());
                }
                PtyMessage::Kill { signal, respond_to } => {
                    let result = self.handle_kill(signal.as_deref()).await;
                    let terminated = result.is_ok() && !self.state.running;
                    let _ = respond_to.send(result);
                    if terminated {
                        break;
                    }
                }
            }
        }

        // Reap whatever is left so no zombie outlives the actor
        if let Ok(None) = self.child.try_wait() {
            debug!("PTY actor dropped with live child {:?}", self.state.pid);
        }
        debug!("PTY actor shutting down");
    }

    fn handle_write_input(&mut self, data: &[u8]) -> Result<usize, PtyError> {
        if !self.state.running {
            return Err(PtyError::ProcessExited);
        }
        if self.writer.is_none() {
            self.writer = Some(
                self.master
                    .take_writer()
                    .map_err(|e| PtyError::WriteFailed(e.to_string()))?,
            );
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PtyError::WriteFailed("No PTY writer available".into()))?;

        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;

        Ok(data.len())
    }

    fn handle_resize(&mut self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        self.state.rows = rows;
        self.state.cols = cols;
        Ok(())
    }

    async fn handle_kill(&mut self, signal: Option<&str>) -> Result<(), PtyError> {
        match signal {
            Some("SIGTERM") | Some("SIGHUP") | None => {
                #[cfg(unix)]
                {
                    use nix::sys::signal::{Signal, kill};
                    use nix::unistd::Pid;

                    let sig = if signal == Some("SIGHUP") {
                        Signal::SIGHUP
                    } else {
                        Signal::SIGTERM
                    };
                    if let Some(pid) = self.state.pid {
                        kill(Pid::from_raw(pid as i32), sig)
                            .map_err(|e| PtyError::KillFailed(e.to_string()))?;
                    }
                }
                #[cfg(not(unix))]
                {
                    self.child
                        .kill()
                        .map_err(|e| PtyError::KillFailed(e.to_string()))?;
                }
                // The child may trap the signal; only a confirmed exit ends the actor
                if let Ok(Some(_)) = self.child.try_wait() {
                    self.state.running = false;
                }
                Ok(())
            }
            Some("SIGKILL") => {
                if let Ok(Some(status)) = self.child.try_wait() {
                    debug!("PTY process already exited: {:?}", status);
                } else {
                    self.send_sigkill()?;
                    self.reap().await;
                }
                self.state.running = false;
                Ok(())
            }
            Some("SIGINT") => {
                // Send Ctrl+C
                self.handle_write_input(b"\x03")?;
                Ok(())
            }
            Some(sig) => Err(PtyError::KillFailed(format!("Unsupported signal: {}", sig))),
        }
    }

    // portable-pty's own kill() sends SIGHUP and sleeps before escalating
    #[cfg(unix)]
    fn send_sigkill(&mut self) -> Result<(), PtyError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.state.pid else {
            return self
                .child
                .kill()
                .map_err(|e| PtyError::KillFailed(e.to_string()));
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| PtyError::KillFailed(e.to_string()))
    }

    #[cfg(not(unix))]
    fn send_sigkill(&mut self) -> Result<(), PtyError> {
        self.child
            .kill()
            .map_err(|e| PtyError::KillFailed(e.to_string()))
    }

    /// Collect the exit status without blocking the runtime
    async fn reap(&mut self) {
        let deadline = tokio::time::Instant::now() + REAP_TIMEOUT;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(REAP_POLL_INTERVAL).await;
                }
                Ok(None) => {
                    warn!("PTY process {:?} not reaped after SIGKILL", self.state.pid);
                    return;
                }
                Err(e) => {
                    warn!("Failed to reap PTY process {:?}: {}", self.state.pid, e);
                    return;
                }
            }
        }
    }
}
