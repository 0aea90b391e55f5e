//! Subprocess transfer executor wrapping the rclone binary.
//!
//! One executor is shared by every phase of a sync run. It owns the set of
//! live child processes so pause/resume/stop act on all of them, and keeps
//! one progress table per direction fed by rclone's JSON log stream.

pub mod progress;

use crate::utils::errors::{Result, SyncError};
use progress::{Direction, ProgressTable, TransferTick};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Retry posture applied to every rclone invocation. Flaky WebDAV mirrors
/// need patience; --ignore-errors keeps a partial pull alive.
pub const RETRY_FLAGS: &[&str] = &[
    "--retries",
    "4",
    "--retries-sleep",
    "10s",
    "--low-level-retries",
    "10",
    "--contimeout",
    "10s",
    "--timeout",
    "10s",
    "--ignore-errors",
];

/// Comparison and listing posture for every invocation. Size-only compare
/// avoids re-hashing multi-gigabyte archives; fast-list and a wide checker
/// pool cut remote round trips on large directory trees.
pub const COPY_FLAGS: &[&str] = &["--size-only", "--fast-list", "--checkers", "16"];

/// Events published while a transfer runs.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Tick {
        direction: Direction,
        tick: TransferTick,
    },
    /// A single file finished transferring (relative path).
    FileCompleted {
        direction: Direction,
        path: String,
    },
}

pub struct TransferExecutor {
    rclone_binary: String,
    rclone_config: Option<PathBuf>,
    children: Mutex<HashSet<u32>>,
    paused: AtomicBool,
    aborted: AtomicBool,
    download: Mutex<ProgressTable>,
    upload: Mutex<ProgressTable>,
}

impl TransferExecutor {
    pub fn new(rclone_binary: &str, rclone_config: Option<PathBuf>) -> Self {
        Self {
            rclone_binary: rclone_binary.to_string(),
            rclone_config,
            children: Mutex::new(HashSet::new()),
            paused: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            download: Mutex::new(ProgressTable::default()),
            upload: Mutex::new(ProgressTable::default()),
        }
    }

    /// Run one rclone invocation to completion, streaming its JSON log into
    /// the direction's progress table and out over `events`.
    pub async fn run(
        &self,
        args: &[String],
        direction: Direction,
        events: Option<&UnboundedSender<TransferEvent>>,
    ) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(SyncError::Aborted);
        }

        let mut cmd = Command::new(&self.rclone_binary);
        cmd.args(args);
        if let Some(config) = &self.rclone_config {
            cmd.arg("--config").arg(config);
        }
        cmd.args(RETRY_FLAGS);
        cmd.args(COPY_FLAGS);
        cmd.args(["--stats", "500ms", "--log-level", "INFO", "--use-json-log"]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!("rclone {}", args.join(" "));
        let mut child = cmd
            .spawn()
            .map_err(|e| SyncError::Transfer(format!("failed to start rclone: {}", e)))?;

        let pid = child.id();
        if let Some(pid) = pid {
            self.children.lock().unwrap().insert(pid);
            // A run started while paused inherits the paused state.
            if self.paused.load(Ordering::SeqCst) {
                signal_pid(pid, PauseSignal::Stop);
            }
        }

        // rclone logs to stderr; merge both streams into one line channel.
        let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx.clone());
        }
        drop(line_tx);

        while let Some(line) = line_rx.recv().await {
            self.digest_line(&line, direction, events);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SyncError::Transfer(format!("rclone wait failed: {}", e)))?;

        if let Some(pid) = pid {
            self.children.lock().unwrap().remove(&pid);
        }
        self.table(direction).lock().unwrap().reset_transfers();

        if self.aborted.load(Ordering::SeqCst) {
            return Err(SyncError::Aborted);
        }
        if !status.success() {
            return Err(SyncError::Transfer(format!(
                "rclone exited with {}",
                status
            )));
        }
        Ok(())
    }

    fn digest_line(
        &self,
        raw: &str,
        direction: Direction,
        events: Option<&UnboundedSender<TransferEvent>>,
    ) {
        let line = progress::strip_ansi(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                debug!("rclone: {}", line);
                return;
            }
        };

        if value.get("level").and_then(|l| l.as_str()) == Some("error") {
            if let Some(msg) = value.get("msg").and_then(|m| m.as_str()) {
                warn!("rclone error: {}", msg);
            }
        }

        let tick = {
            let mut table = self.table(direction).lock().unwrap();
            let mut on_complete = |path: &str| {
                if let Some(tx) = events {
                    let _ = tx.send(TransferEvent::FileCompleted {
                        direction,
                        path: path.to_string(),
                    });
                }
            };
            table.apply_json(&value, &mut on_complete)
        };

        if let (Some(tick), Some(tx)) = (tick, events) {
            let _ = tx.send(TransferEvent::Tick { direction, tick });
        }
    }

    fn table(&self, direction: Direction) -> &Mutex<ProgressTable> {
        match direction {
            Direction::Download => &self.download,
            Direction::Upload => &self.upload,
        }
    }

    /// Paths completed this session for a direction.
    pub fn completed(&self, direction: Direction) -> HashSet<String> {
        self.table(direction).lock().unwrap().completed().clone()
    }

    /// Suspend all live rclone processes. Idempotent.
    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Transfers paused");
        for pid in self.children.lock().unwrap().iter() {
            signal_pid(*pid, PauseSignal::Stop);
        }
    }

    /// Resume previously suspended processes. Idempotent.
    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Transfers resumed");
        for pid in self.children.lock().unwrap().iter() {
            signal_pid(*pid, PauseSignal::Cont);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Abort the whole run: mark aborted and kill every live child. Any
    /// in-flight `run` resolves to `SyncError::Aborted`.
    pub fn stop(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.resume_for_kill();
        for pid in self.children.lock().unwrap().drain() {
            signal_pid(pid, PauseSignal::Kill);
        }
    }

    fn resume_for_kill(&self) {
        // A stopped process cannot handle SIGKILL cleanup paths; continue
        // it first.
        if self.paused.swap(false, Ordering::SeqCst) {
            for pid in self.children.lock().unwrap().iter() {
                signal_pid(*pid, PauseSignal::Cont);
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Clear all per-session state ahead of a fresh run.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        *self.download.lock().unwrap() = ProgressTable::default();
        *self.upload.lock().unwrap() = ProgressTable::default();
    }
}

enum PauseSignal {
    Stop,
    Cont,
    Kill,
}

#[cfg(unix)]
fn signal_pid(pid: u32, signal: PauseSignal) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let sig = match signal {
        PauseSignal::Stop => Signal::SIGSTOP,
        PauseSignal::Cont => Signal::SIGCONT,
        PauseSignal::Kill => Signal::SIGKILL,
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
        error!("Failed to signal rclone pid {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn signal_pid(pid: u32, signal: PauseSignal) {
    // Process suspension is a Unix facility; elsewhere only abort-by-flag
    // is available and the child exits at the next run boundary.
    match signal {
        PauseSignal::Kill => {}
        _ => warn!("Pause/resume not supported on this platform (pid {})", pid),
    }
}

fn spawn_line_reader<R>(stream: R, tx: UnboundedSender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_flags_shape() {
        // Flags must come in valid flag/value pairs for rclone's parser
        assert!(RETRY_FLAGS.contains(&"--ignore-errors"));
        assert_eq!(RETRY_FLAGS.iter().filter(|f| f.starts_with("--")).count(), 6);
    }

    #[test]
    fn test_copy_flags_shape() {
        assert!(COPY_FLAGS.contains(&"--size-only"));
        assert!(COPY_FLAGS.contains(&"--fast-list"));
        let i = COPY_FLAGS.iter().position(|f| *f == "--checkers").unwrap();
        assert_eq!(COPY_FLAGS[i + 1], "16");
    }

    #[tokio::test]
    async fn test_run_after_stop_is_aborted() {
        let exec = TransferExecutor::new("rclone", None);
        exec.stop();
        let err = exec
            .run(&["lsd".to_string()], Direction::Download, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Aborted));
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let exec = TransferExecutor::new("rclone", None);
        assert!(!exec.is_paused());
        exec.pause();
        exec.pause();
        assert!(exec.is_paused());
        exec.resume();
        exec.resume();
        assert!(!exec.is_paused());
    }

    #[test]
    fn test_reset_clears_abort() {
        let exec = TransferExecutor::new("rclone", None);
        exec.stop();
        assert!(exec.is_aborted());
        exec.reset();
        assert!(!exec.is_aborted());
    }
}
