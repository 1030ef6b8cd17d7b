use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use pty_manager::{PtyConfig, PtyError, PtyHandle};

use super::session::{OutputLog, TerminalSession};
use super::types::{TerminalError, TerminalRecord, TerminalSpec};
use crate::socket::Socket;

/// Values used for any field a [`TerminalSpec`] leaves out
#[derive(Debug, Clone)]
pub struct TerminalDefaults {
    pub shell: String,
    pub workspace_root: PathBuf,
    pub term_name: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalDefaults {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            workspace_root: PathBuf::from("/home"),
            term_name: "xterm-color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Owns every terminal of the process.
///
/// The registry sits behind one async mutex held for the whole of each
/// operation, spawn and kill included, so callers always observe it either
/// before or after a command and never half way through.
pub struct TerminalManager {
    defaults: TerminalDefaults,
    /// Insertion ordered
    registry: Mutex<Vec<TerminalSession>>,
    title_counter: AtomicU64,
}

impl TerminalManager {
    pub fn new(defaults: TerminalDefaults) -> Self {
        Self {
            defaults,
            registry: Mutex::new(Vec::new()),
            title_counter: AtomicU64::new(1),
        }
    }

    /// Snapshot of all terminals in creation order
    pub async fn list(&self) -> Vec<TerminalRecord> {
        self.registry.lock().await.iter().map(|t| t.record()).collect()
    }

    pub async fn create(&self, spec: TerminalSpec) -> Result<TerminalRecord, TerminalError> {
        let mut registry = self.registry.lock().await;
        if let Some(id) = &spec.id {
            if registry.iter().any(|t| &t.id == id) {
                return Err(TerminalError::AlreadyExists(id.clone()));
            }
        }

        let session = self.spawn_session(spec)?;
        let record = session.record();
        registry.push(session);
        Ok(record)
    }

    /// Kill the process and forget the terminal
    pub async fn destroy(&self, id: &str) -> Result<(), TerminalError> {
        let mut registry = self.registry.lock().await;
        let index = position(&registry, id)?;
        let session = registry.remove(index);

        info!(terminal = %session.id, pid = session.pid, "Destroying terminal");
        kill(&session.handle, &session.id).await;
        Ok(())
    }

    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let mut registry = self.registry.lock().await;
        let index = position(&registry, id)?;
        let session = &mut registry[index];

        match session.handle.resize(rows, cols).await {
            Ok(()) => {}
            // The shell may have exited on its own; the entry stays until destroyed
            Err(PtyError::ProcessExited | PtyError::ChannelError(_)) => {
                debug!(terminal = %id, "Resized terminal whose process has exited");
            }
            Err(e) => return Err(e.into()),
        }
        session.cols = cols;
        session.rows = rows;
        Ok(())
    }

    pub async fn rename(&self, id: &str, title: String) -> Result<(), TerminalError> {
        let mut registry = self.registry.lock().await;
        let index = position(&registry, id)?;
        registry[index].title = title;
        Ok(())
    }

    /// Reconcile the registry against `targets`.
    ///
    /// Terminals absent from `targets` are destroyed, targets with no
    /// terminal yet are created, and ids present on both sides are left
    /// alone. New processes are spawned before anything is killed; if one
    /// fails to spawn the others are killed again and the registry is left
    /// as it was.
    pub async fn set(
        &self,
        targets: Vec<TerminalSpec>,
    ) -> Result<Vec<TerminalRecord>, TerminalError> {
        let mut wanted: Vec<(String, TerminalSpec)> = Vec::new();
        for spec in targets {
            let Some(id) = spec.id.clone() else {
                return Err(TerminalError::InvalidSpec(
                    "set entries require an id".to_string(),
                ));
            };
            // Later duplicates replace earlier ones
            match wanted.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = spec,
                None => wanted.push((id, spec)),
            }
        }

        let mut registry = self.registry.lock().await;
        let current: HashSet<String> = registry.iter().map(|t| t.id.clone()).collect();
        let to_open: Vec<TerminalSpec> = wanted
            .iter()
            .filter(|(id, _)| !current.contains(id))
            .map(|(_, spec)| spec.clone())
            .collect();

        // Titles are only handed out under the registry lock, so a rollback can return them
        let first_title = self.title_counter.load(Ordering::Relaxed);
        let mut opened = Vec::with_capacity(to_open.len());
        for spec in to_open {
            match self.spawn_session(spec) {
                Ok(session) => opened.push(session),
                Err(e) => {
                    warn!(
                        "Reconciliation aborted, rolling back {} spawned terminals",
                        opened.len()
                    );
                    for session in opened {
                        kill(&session.handle, &session.id).await;
                    }
                    self.title_counter.store(first_title, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }

        let keep: HashSet<&str> = wanted.iter().map(|(id, _)| id.as_str()).collect();
        let mut closing = Vec::new();
        registry.retain(|session| {
            if keep.contains(session.id.as_str()) {
                true
            } else {
                closing.push((session.id.clone(), session.handle.clone()));
                false
            }
        });
        info!(
            created = opened.len(),
            destroyed = closing.len(),
            "Reconciled terminals"
        );
        registry.extend(opened);

        for (id, handle) in &closing {
            kill(handle, id).await;
        }

        Ok(registry.iter().map(|t| t.record()).collect())
    }

    /// Attach `socket` as a viewer of terminal `id`.
    ///
    /// The viewer first receives the whole output history, then live output.
    /// Everything it sends is written to the terminal's input. Disconnecting
    /// only detaches the viewer.
    pub async fn connect_direct(&self, id: &str, socket: &Arc<Socket>) -> Result<(), TerminalError> {
        let registry = self.registry.lock().await;
        let index = position(&registry, id)?;
        let session = &registry[index];

        let replayed = session.output.attach(socket.clone());
        info!(terminal = %id, socket = %socket.id(), replayed, "Viewer connected");

        // Inbound frames are queued so writes reach the process in arrival order
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let handle = session.handle.clone();
        let terminal = session.id.clone();
        tokio::spawn(async move {
            while let Some(data) = input_rx.recv().await {
                if let Err(e) = handle.write(&data).await {
                    warn!(terminal = %terminal, "Terminal write failed: {}", e);
                }
            }
        });
        socket.listen_raw(move |data| {
            let _ = input_tx.send(data.to_vec());
        });

        let output = session.output.clone();
        let viewer = socket.id();
        let terminal = session.id.clone();
        socket.on_close(move || {
            output.detach(viewer);
            info!(terminal = %terminal, socket = %viewer, "Viewer disconnected");
        });
        Ok(())
    }

    /// Kill every terminal. Used when the server stops.
    pub async fn shutdown(&self) {
        let sessions = std::mem::take(&mut *self.registry.lock().await);
        if !sessions.is_empty() {
            info!("Killing {} terminals", sessions.len());
        }
        for session in sessions {
            kill(&session.handle, &session.id).await;
        }
    }

    pub(crate) async fn output(&self, id: &str) -> Option<Arc<OutputLog>> {
        let registry = self.registry.lock().await;
        registry.iter().find(|t| t.id == id).map(|t| t.output.clone())
    }

    /// Hold the registry so commands queue up behind the caller
    #[cfg(test)]
    pub(crate) async fn lock_registry(&self) -> tokio::sync::MutexGuard<'_, Vec<TerminalSession>> {
        self.registry.lock().await
    }

    fn spawn_session(&self, spec: TerminalSpec) -> Result<TerminalSession, TerminalError> {
        let defaults = &self.defaults;
        let id = spec
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut env: Vec<(String, String)> = spec.env.unwrap_or_default().into_iter().collect();
        env.sort();

        let config = PtyConfig {
            command: spec.command.unwrap_or_else(|| defaults.shell.clone()),
            args: spec.args.unwrap_or_default(),
            working_dir: Some(spec.cwd.unwrap_or_else(|| defaults.workspace_root.clone())),
            env,
            cols: spec.cols.filter(|c| *c > 0).unwrap_or(defaults.cols),
            rows: spec.rows.filter(|r| *r > 0).unwrap_or(defaults.rows),
            term: defaults.term_name.clone(),
        };

        let title = spec.title;
        let allocate_title = || {
            title.unwrap_or_else(|| {
                format!("Terminal {}", self.title_counter.fetch_add(1, Ordering::Relaxed))
            })
        };
        TerminalSession::spawn(id, allocate_title, spec.mode.unwrap_or_default(), config)
    }
}

fn position(registry: &[TerminalSession], id: &str) -> Result<usize, TerminalError> {
    registry
        .iter()
        .position(|t| t.id == id)
        .ok_or_else(|| TerminalError::NoSuchTerminal(id.to_string()))
}

async fn kill(handle: &PtyHandle, id: &str) {
    match handle.kill(Some("SIGKILL")).await {
        Ok(()) | Err(PtyError::ProcessExited) => {}
        Err(e) => warn!(terminal = %id, "Failed to kill terminal process: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{Frame, Group};
    use crate::terminal::TerminalMode;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> TerminalManager {
        TerminalManager::new(TerminalDefaults {
            shell: "sh".to_string(),
            workspace_root: dir.path().to_path_buf(),
            ..Default::default()
        })
    }

    fn sleeper(id: &str) -> TerminalSpec {
        TerminalSpec {
            id: Some(id.to_string()),
            command: Some("sleep".to_string()),
            args: Some(vec!["30".to_string()]),
            ..Default::default()
        }
    }

    #[cfg(unix)]
    fn process_gone(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_err()
    }

    async fn wait_for(log: &OutputLog, done: impl Fn(&str) -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !done(&log.transcript()) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("timed out waiting for terminal output");
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> String {
        let mut out = String::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Text(text) = frame {
                out.push_str(&text);
            }
        }
        out
    }

    #[tokio::test]
    async fn create_then_list_reports_requested_dimensions() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let record = manager
            .create(TerminalSpec {
                cols: Some(81),
                rows: Some(25),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!((record.cols, record.rows), (81, 25));
        assert_eq!(record.mode, TerminalMode::ReadWrite);
        assert_eq!(record.title, "Terminal 1");
        assert!(record.pid > 0);
        assert!(!record.id.is_empty());
        assert_eq!(manager.list().await, vec![record]);

        manager.shutdown().await;
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn destroy_unknown_leaves_registry_untouched() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.create(sleeper("a")).await.unwrap();
        let before = manager.list().await;

        let err = manager.destroy("nonexistent").await.unwrap_err();
        assert_eq!(err.to_wire(), json!({"code": 404}));
        assert_eq!(manager.list().await, before);

        manager.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn destroy_kills_the_process() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let record = manager.create(sleeper("a")).await.unwrap();
        assert!(!process_gone(record.pid));

        manager.destroy("a").await.unwrap();
        assert!(manager.list().await.is_empty());
        assert!(process_gone(record.pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn destroy_does_not_wait_on_processes_ignoring_hangup() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let record = manager
            .create(TerminalSpec {
                id: Some("h".to_string()),
                args: Some(vec![
                    "-c".to_string(),
                    "trap '' HUP; echo trapped; while :; do sleep 1; done".to_string(),
                ]),
                ..Default::default()
            })
            .await
            .unwrap();
        let log = manager.output("h").await.unwrap();
        wait_for(&log, |t| t.contains("trapped")).await;

        let started = std::time::Instant::now();
        manager.destroy("h").await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(150), "destroy took {:?}", elapsed);
        assert!(process_gone(record.pid));
    }

    #[tokio::test]
    async fn generated_titles_are_never_reused() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let first = manager.create(sleeper("a")).await.unwrap();
        manager.destroy("a").await.unwrap();
        let named = manager
            .create(TerminalSpec {
                title: Some("mine".to_string()),
                ..sleeper("b")
            })
            .await
            .unwrap();
        let second = manager.create(sleeper("c")).await.unwrap();

        assert_eq!(first.title, "Terminal 1");
        assert_eq!(named.title, "mine");
        assert_eq!(second.title, "Terminal 2");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn create_with_existing_id_conflicts() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.create(sleeper("a")).await.unwrap();

        let err = manager.create(sleeper("a")).await.unwrap_err();
        assert!(matches!(err, TerminalError::AlreadyExists(_)));
        assert_eq!(manager.list().await.len(), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_and_not_registered() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let err = manager
            .create(TerminalSpec {
                cwd: Some(dir.path().join("missing")),
                ..sleeper("a")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Spawn(_)));
        assert_eq!(err.code(), 500);
        assert!(manager.list().await.is_empty());

        // The failed attempt did not take a title number
        let created = manager.create(sleeper("b")).await.unwrap();
        assert_eq!(created.title, "Terminal 1");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn resize_and_rename_update_the_record() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.create(sleeper("a")).await.unwrap();

        manager.resize("a", 120, 40).await.unwrap();
        manager.rename("a", "build".to_string()).await.unwrap();
        let record = &manager.list().await[0];
        assert_eq!((record.cols, record.rows), (120, 40));
        assert_eq!(record.title, "build");

        assert!(matches!(
            manager.resize("zz", 1, 1).await,
            Err(TerminalError::NoSuchTerminal(_))
        ));
        assert!(matches!(
            manager.rename("zz", "x".to_string()).await,
            Err(TerminalError::NoSuchTerminal(_))
        ));

        manager.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn set_reconciles_without_recreating_survivors() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let listed = manager.set(vec![sleeper("a"), sleeper("b")]).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        let pid_a = listed[0].pid;
        let pid_b = listed[1].pid;

        let listed = manager.set(vec![sleeper("b")]).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "b");
        assert_eq!(listed[0].pid, pid_b);
        assert!(process_gone(pid_a));

        // Same target again: no churn
        let again = manager.set(vec![sleeper("b")]).await.unwrap();
        assert_eq!(again, listed);

        manager.shutdown().await;
        assert!(process_gone(pid_b));
    }

    #[tokio::test]
    async fn set_rolls_back_when_a_spawn_fails() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.create(sleeper("keep")).await.unwrap();
        let before = manager.list().await;

        let broken = TerminalSpec {
            cwd: Some(dir.path().join("missing")),
            ..sleeper("broken")
        };
        let err = manager
            .set(vec![sleeper("fresh"), broken])
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Spawn(_)));
        assert_eq!(manager.list().await, before);
        assert_eq!(before[0].title, "Terminal 1");

        // "fresh" was spawned and rolled back; its title number is handed out again
        let next = manager.create(sleeper("next")).await.unwrap();
        assert_eq!(next.title, "Terminal 2");
        manager.destroy("next").await.unwrap();

        let err = manager
            .set(vec![TerminalSpec::default()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
        assert_eq!(manager.list().await, before);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn direct_viewers_replay_history_then_follow_live_output() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager
            .create(TerminalSpec {
                id: Some("t".to_string()),
                args: Some(vec![
                    "-c".to_string(),
                    "printf 'ready\\n'; exec cat".to_string(),
                ]),
                ..Default::default()
            })
            .await
            .unwrap();
        let log = manager.output("t").await.unwrap();
        wait_for(&log, |t| t.contains("ready\r\n")).await;

        let (first, mut rx1) = Socket::new(Group::new());
        manager.connect_direct("t", &first).await.unwrap();
        let history = drain(&mut rx1);
        assert_eq!(history, log.transcript());

        // Input from a viewer reaches the process; the pty echoes it and cat repeats it
        let _ = first.handle_frame(Frame::from("hello\n"));
        wait_for(&log, |t| t.matches("hello\r\n").count() >= 2).await;

        let (second, mut rx2) = Socket::new(Group::new());
        manager.connect_direct("t", &second).await.unwrap();
        let transcript = log.transcript();
        assert!(transcript.starts_with("ready"));
        assert_eq!(drain(&mut rx2), transcript);

        // The first viewer saw history then live output, nothing twice
        let live = drain(&mut rx1);
        assert_eq!(format!("{history}{live}"), transcript);

        first.teardown();
        assert_eq!(log.viewer_count(), 1);
        assert_eq!(manager.list().await.len(), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn direct_connect_to_unknown_terminal_fails() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let (socket, _rx) = Socket::new(Group::new());

        let err = manager.connect_direct("nope", &socket).await.unwrap_err();
        assert_eq!(err.code(), 404);
    }
}
