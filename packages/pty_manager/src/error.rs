/// Errors that can occur during PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// Failed to open the PTY or spawn the child on it
    #[error("failed to create PTY: {0}")]
    CreateFailed(String),
    /// Failed to write to the PTY
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),
    /// Failed to resize the PTY
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),
    /// Failed to signal the PTY process
    #[error("failed to kill PTY: {0}")]
    KillFailed(String),
    /// PTY process has exited
    #[error("PTY process has exited")]
    ProcessExited,
    /// The actor behind a handle is gone
    #[error("channel error: {0}")]
    ChannelError(String),
}
