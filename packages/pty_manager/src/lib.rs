//! PTY Manager - PTY process wrapper
//!
//! Spawns one child process on a pseudo-terminal and exposes it through a
//! cloneable [`PtyHandle`]. Every output chunk the child produces is delivered,
//! in order, on the [`PtyOutputStream`] returned by [`PtyActor::spawn`]; the
//! stream has exactly one consumer and never drops data.
//!
//! # Example
//!
//! ```no_run
//! use pty_manager::{PtyActor, PtyConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PtyConfig {
//!         command: "/bin/sh".to_string(),
//!         working_dir: Some("/tmp".into()),
//!         ..Default::default()
//!     };
//!
//!     let (handle, mut output) = PtyActor::spawn(config).unwrap();
//!     handle.write_str("echo hello\n").await.unwrap();
//!
//!     while let Some(chunk) = output.recv().await {
//!         print!("{}", String::from_utf8_lossy(&chunk.data));
//!     }
//! }
//! ```

mod error;
pub mod pty;

pub use error::PtyError;
pub use pty::{PtyActor, PtyConfig, PtyHandle, PtyOutput, PtyOutputStream, PtyState};
