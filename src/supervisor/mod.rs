//! Encoder subprocess supervisor.
//!
//! Owns at most one running child. Replacements are optimistic: the new
//! child is spawned and the broadcast reader re-pointed at its stdout before
//! the old child is signalled, so viewers see the smallest possible gap.
//! All transitions serialize on one lock.

use crate::broadcast::{self, ReaderExit, ViewerRegistry};
use crate::error::{Error, Result};
use crate::layout::LayoutConfig;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, Mutex};
use utoipa::ToSchema;

/// Grace period between SIGTERM and SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// A child that dies again within this window after an automatic restart
/// takes the whole stream down.
const RESTART_WINDOW: Duration = Duration::from_secs(5);

/// Broadcast lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Starting,
    Live,
}

/// The single owned runtime record, everything guarded by the supervisor
/// lock.
struct RuntimeState {
    mode: Mode,
    child: Option<Child>,
    current_layout: Option<LayoutConfig>,
    current_cmd: Option<Vec<String>>,
    last_good_layout: Option<LayoutConfig>,
    last_good_cmd: Option<Vec<String>>,
    /// Bumped on every child handoff; readers report it back on EOF so exits
    /// from superseded children are ignored.
    generation: u64,
    /// Bumped on every observable layout change; read-modify-write callers
    /// use it to detect conflicting transitions.
    epoch: u64,
    started_at: Option<Instant>,
    restart_attempted: bool,
}

/// Read-only copy of the observable runtime state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub mode: Mode,
    pub current_layout: Option<LayoutConfig>,
    pub last_good_layout: Option<LayoutConfig>,
    pub epoch: u64,
}

pub struct Supervisor {
    state: Mutex<RuntimeState>,
    viewers: Arc<ViewerRegistry>,
    bytes_out: Arc<AtomicU64>,
    exit_tx: mpsc::Sender<ReaderExit>,
}

impl Supervisor {
    /// Create the supervisor and the reader-exit channel its monitor task
    /// consumes. Callers must hand the receiver to [`Supervisor::spawn_monitor`].
    pub fn new(viewers: Arc<ViewerRegistry>) -> (Arc<Self>, mpsc::Receiver<ReaderExit>) {
        let (exit_tx, exit_rx) = mpsc::channel(8);
        let supervisor = Arc::new(Self {
            state: Mutex::new(RuntimeState {
                mode: Mode::Idle,
                child: None,
                current_layout: None,
                current_cmd: None,
                last_good_layout: None,
                last_good_cmd: None,
                generation: 0,
                epoch: 0,
                started_at: None,
                restart_attempted: false,
            }),
            viewers,
            bytes_out: Arc::new(AtomicU64::new(0)),
            exit_tx,
        });
        (supervisor, exit_rx)
    }

    /// Spawn the background task that reacts to unexpected child exits.
    pub fn spawn_monitor(
        self: &Arc<Self>,
        exit_rx: mpsc::Receiver<ReaderExit>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_monitor(exit_rx))
    }

    /// Cumulative stdout bytes of the current child.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    pub async fn snapshot(&self) -> Snapshot {
        let st = self.state.lock().await;
        Snapshot {
            mode: st.mode,
            current_layout: st.current_layout.clone(),
            last_good_layout: st.last_good_layout.clone(),
            epoch: st.epoch,
        }
    }

    /// Start (or optimistically replace) the child for a freshly compiled
    /// layout. On failure any previously running child is left untouched.
    pub async fn apply(&self, layout: LayoutConfig, cmd: Vec<String>) -> Result<()> {
        let mut st = self.state.lock().await;
        self.start_locked(&mut st, &cmd)?;
        st.current_layout = Some(layout.clone());
        st.current_cmd = Some(cmd.clone());
        st.last_good_layout = Some(layout);
        st.last_good_cmd = Some(cmd);
        st.epoch += 1;
        Ok(())
    }

    /// Like [`Supervisor::apply`], but only if no other transition landed
    /// since the caller snapshotted `expected_epoch`.
    pub async fn apply_if_epoch(
        &self,
        layout: LayoutConfig,
        cmd: Vec<String>,
        expected_epoch: u64,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.epoch != expected_epoch {
            return Err(Error::Busy("layout changed while the update was prepared".into()));
        }
        self.start_locked(&mut st, &cmd)?;
        st.current_layout = Some(layout.clone());
        st.current_cmd = Some(cmd.clone());
        st.last_good_layout = Some(layout);
        st.last_good_cmd = Some(cmd);
        st.epoch += 1;
        Ok(())
    }

    /// Stop the child and go idle. `last_good` survives for cold starts.
    pub async fn stop(&self) {
        let mut st = self.state.lock().await;
        self.stop_locked(&mut st);
    }

    /// Restart the current command, e.g. when the output size bound is hit.
    /// No-op unless live.
    pub async fn recycle(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.mode != Mode::Live {
            return Ok(());
        }
        let Some(cmd) = st.current_cmd.clone() else {
            return Ok(());
        };
        tracing::info!("Recycling encoder child");
        self.start_locked(&mut st, &cmd)
    }

    /// Bring the stream up from the remembered last-good command.
    ///
    /// Returns `Ok(false)` when there is nothing to start from, `Ok(true)`
    /// when the stream is (now) running.
    pub async fn cold_start(&self) -> Result<bool> {
        let mut st = self.state.lock().await;
        match st.mode {
            Mode::Live | Mode::Starting => Ok(true),
            Mode::Idle => {
                let Some(cmd) = st.last_good_cmd.clone() else {
                    return Ok(false);
                };
                tracing::info!("Cold starting from last good layout");
                st.mode = Mode::Starting;
                match self.start_locked(&mut st, &cmd) {
                    Ok(()) => {
                        st.current_layout = st.last_good_layout.clone();
                        st.current_cmd = Some(cmd);
                        st.epoch += 1;
                        Ok(true)
                    }
                    Err(e) => {
                        st.mode = Mode::Idle;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Spawn a child for `cmd`, attach a broadcast reader to its stdout, and
    /// only then retire the previous child.
    fn start_locked(&self, st: &mut RuntimeState, cmd: &[String]) -> Result<()> {
        let generation = st.generation + 1;
        let mut child = spawn_child(cmd)?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stderr(stderr));
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("encoder stdout was not captured".into()))?;

        st.generation = generation;
        self.bytes_out.store(0, Ordering::Relaxed);
        tokio::spawn(broadcast::run_reader(
            stdout,
            Arc::clone(&self.viewers),
            Arc::clone(&self.bytes_out),
            generation,
            self.exit_tx.clone(),
        ));

        let old = st.child.replace(child);
        st.mode = Mode::Live;
        st.started_at = Some(Instant::now());
        st.restart_attempted = false;

        if let Some(old) = old {
            tokio::spawn(terminate_child(old));
        }
        Ok(())
    }

    fn stop_locked(&self, st: &mut RuntimeState) {
        if let Some(child) = st.child.take() {
            tokio::spawn(terminate_child(child));
        }
        st.generation += 1;
        st.mode = Mode::Idle;
        st.current_layout = None;
        st.current_cmd = None;
        st.started_at = None;
        st.restart_attempted = false;
        st.epoch += 1;
        self.viewers.disconnect_all();
        tracing::info!("Encoder stopped, broadcast idle");
    }

    /// React to reader end-of-stream notifications: one automatic restart
    /// for an unexpected exit, idle if the replacement dies right away too.
    async fn run_monitor(self: Arc<Self>, mut exit_rx: mpsc::Receiver<ReaderExit>) {
        while let Some(exit) = exit_rx.recv().await {
            let mut st = self.state.lock().await;
            if exit.generation != st.generation || st.mode != Mode::Live {
                continue;
            }

            if let Some(mut child) = st.child.take() {
                match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::warn!(%status, "Encoder exited unexpectedly");
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "Failed to reap encoder child"),
                    Err(_) => {
                        tracing::warn!("Encoder closed stdout but did not exit, killing");
                        let _ = child.kill().await;
                    }
                }
            }

            // A child that streamed for a while may be restarted again.
            let ran_long = st
                .started_at
                .map(|t| t.elapsed() >= RESTART_WINDOW)
                .unwrap_or(false);
            if ran_long {
                st.restart_attempted = false;
            }

            match st.current_cmd.clone() {
                Some(cmd) if !st.restart_attempted => {
                    tracing::info!("Attempting automatic encoder restart");
                    match self.start_locked(&mut st, &cmd) {
                        Ok(()) => st.restart_attempted = true,
                        Err(e) => {
                            tracing::error!(error = %e, "Automatic restart failed");
                            self.stop_locked(&mut st);
                        }
                    }
                }
                _ => {
                    tracing::error!(
                        "Encoder failed twice within {}s, going idle",
                        RESTART_WINDOW.as_secs()
                    );
                    self.stop_locked(&mut st);
                }
            }
        }
    }
}

fn spawn_child(cmd: &[String]) -> Result<Child> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| Error::Internal("empty encoder command".into()))?;

    tracing::debug!(target: "ffmpeg", command = ?cmd, "Spawning encoder");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    command
        .spawn()
        .map_err(|e| Error::EncoderFailed(format!("failed to spawn {program}: {e}")))
}

/// SIGTERM, wait up to the grace period, then SIGKILL.
async fn terminate_child(mut child: Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(%status, "Encoder child exited"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed waiting for encoder child"),
        Err(_) => {
            tracing::warn!("Encoder child ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill encoder child");
            }
        }
    }
}

/// Forward the child's stderr into the log, line by line.
async fn pump_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "ffmpeg", "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutKind;
    use std::collections::BTreeMap;

    fn test_layout() -> LayoutConfig {
        LayoutConfig {
            kind: LayoutKind::Pip,
            streams: BTreeMap::from([
                ("main".to_string(), "a".to_string()),
                ("inset".to_string(), "b".to_string()),
            ]),
            audio_source: "main".to_string(),
            volumes: BTreeMap::new(),
            custom_slots: None,
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn new_supervisor() -> Arc<Supervisor> {
        let viewers = Arc::new(ViewerRegistry::new());
        let (supervisor, exit_rx) = Supervisor::new(viewers);
        supervisor.spawn_monitor(exit_rx);
        supervisor
    }

    async fn wait_for_mode(supervisor: &Supervisor, want: Mode) {
        for _ in 0..100 {
            if supervisor.mode().await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("mode never became {want:?}");
    }

    #[tokio::test]
    async fn apply_then_stop() {
        let supervisor = new_supervisor();
        supervisor
            .apply(test_layout(), sh("sleep 30"))
            .await
            .unwrap();
        assert_eq!(supervisor.mode().await, Mode::Live);

        let snapshot = supervisor.snapshot().await;
        assert!(snapshot.current_layout.is_some());
        assert!(snapshot.last_good_layout.is_some());

        supervisor.stop().await;
        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.mode, Mode::Idle);
        assert!(snapshot.current_layout.is_none());
        assert!(snapshot.last_good_layout.is_some());
    }

    #[tokio::test]
    async fn failed_spawn_leaves_running_child_untouched() {
        let supervisor = new_supervisor();
        supervisor
            .apply(test_layout(), sh("sleep 30"))
            .await
            .unwrap();
        let before = supervisor.snapshot().await;

        let err = supervisor
            .apply(test_layout(), vec!["/nonexistent/encoder".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "encoder-failed");

        let after = supervisor.snapshot().await;
        assert_eq!(after.mode, Mode::Live);
        assert_eq!(after.epoch, before.epoch);
    }

    #[tokio::test]
    async fn optimistic_replace_stays_live() {
        let supervisor = new_supervisor();
        supervisor
            .apply(test_layout(), sh("sleep 30"))
            .await
            .unwrap();
        let first = supervisor.snapshot().await;

        supervisor
            .apply(test_layout(), sh("sleep 31"))
            .await
            .unwrap();
        let second = supervisor.snapshot().await;
        assert_eq!(second.mode, Mode::Live);
        assert_eq!(second.epoch, first.epoch + 1);
    }

    #[tokio::test]
    async fn crash_loop_settles_to_idle() {
        let supervisor = new_supervisor();
        supervisor.apply(test_layout(), sh("exit 1")).await.unwrap();
        // First exit triggers one automatic restart; the restart dies inside
        // the window and the supervisor gives up.
        wait_for_mode(&supervisor, Mode::Idle).await;
        let snapshot = supervisor.snapshot().await;
        assert!(snapshot.current_layout.is_none());
        assert!(snapshot.last_good_layout.is_some());
    }

    #[tokio::test]
    async fn cold_start_uses_last_good() {
        let supervisor = new_supervisor();
        assert!(!supervisor.cold_start().await.unwrap());

        supervisor
            .apply(test_layout(), sh("sleep 30"))
            .await
            .unwrap();
        supervisor.stop().await;
        assert_eq!(supervisor.mode().await, Mode::Idle);

        assert!(supervisor.cold_start().await.unwrap());
        assert_eq!(supervisor.mode().await, Mode::Live);
        assert!(supervisor.snapshot().await.current_layout.is_some());
    }

    #[tokio::test]
    async fn apply_if_epoch_detects_conflicts() {
        let supervisor = new_supervisor();
        supervisor
            .apply(test_layout(), sh("sleep 30"))
            .await
            .unwrap();
        let stale = supervisor.snapshot().await.epoch;

        supervisor
            .apply(test_layout(), sh("sleep 31"))
            .await
            .unwrap();

        let err = supervisor
            .apply_if_epoch(test_layout(), sh("sleep 32"), stale)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "busy");
    }

    #[tokio::test]
    async fn recycle_is_noop_when_idle() {
        let supervisor = new_supervisor();
        supervisor.recycle().await.unwrap();
        assert_eq!(supervisor.mode().await, Mode::Idle);
    }
}
