//! Crash-safe session state, persisted as a dotfile in the library root.
//!
//! The orchestrator writes a snapshot at every phase boundary, and the
//! phases journal individual files as they are downloaded, scanned, and
//! uploaded. On startup a surviving state file means the previous run did
//! not finish; the session is resumed rather than restarted, and the
//! per-file lists keep resumed work from repeating mid-phase.

use crate::utils::errors::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const STATE_FILE: &str = ".sync_state.json";

/// Lifecycle of one phase within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
    /// The phase ran but did not cover everything, e.g. a shield sweep
    /// that ended early on a disposal failure.
    Incomplete,
}

/// Everything needed to resume an interrupted sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSessionState {
    pub session_id: String,
    pub started_at: String,
    pub last_updated_at: String,
    pub pull: PhaseStatus,
    pub clean: PhaseStatus,
    pub cloud: PhaseStatus,
    /// Transfers were suspended when this snapshot was written.
    #[serde(default)]
    pub paused: bool,
    pub files_pulled: usize,
    pub files_uploaded: usize,
    /// Relative paths fetched this session, including ones the shield
    /// later removed. Resume skips re-pulling them.
    #[serde(default)]
    pub downloaded: Vec<String>,
    /// Archives the shield classified this session.
    #[serde(default)]
    pub scanned: Vec<String>,
    /// Relative paths confirmed uploaded this session.
    #[serde(default)]
    pub uploaded: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SyncSessionState {
    pub fn new(session_id: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            session_id: session_id.to_string(),
            started_at: now.clone(),
            last_updated_at: now,
            pull: PhaseStatus::Pending,
            clean: PhaseStatus::Pending,
            cloud: PhaseStatus::Pending,
            paused: false,
            files_pulled: 0,
            files_uploaded: 0,
            downloaded: Vec::new(),
            scanned: Vec::new(),
            uploaded: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE)
    }

    /// Load a persisted session, if any. A corrupt file is treated as
    /// absent; resuming from garbage is worse than restarting.
    pub fn load(dir: &Path) -> Option<Self> {
        let path = Self::path(dir);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("Discarding unreadable session state: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read session state: {}", e);
                None
            }
        }
    }

    /// Persist the snapshot, refreshing the update timestamp.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        self.last_updated_at = Utc::now().to_rfc3339();
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(dir), data)?;
        Ok(())
    }

    /// Remove the state file after a fully successful run.
    pub fn clear(dir: &Path) -> Result<()> {
        let path = Self::path(dir);
        if path.exists() {
            std::fs::remove_file(path)?;
            info!("Session state cleared");
        }
        Ok(())
    }

    /// A session is resumable while any phase has not finished.
    pub fn is_resumable(&self) -> bool {
        [self.pull, self.clean, self.cloud].iter().any(|p| {
            matches!(
                p,
                PhaseStatus::Pending
                    | PhaseStatus::Running
                    | PhaseStatus::Failed
                    | PhaseStatus::Incomplete
            )
        })
    }

    pub fn record_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn downloaded_set(&self) -> HashSet<String> {
        self.downloaded.iter().cloned().collect()
    }

    pub fn uploaded_set(&self) -> HashSet<String> {
        self.uploaded.iter().cloned().collect()
    }
}

/// Shared handle the phases use to journal per-file progress without
/// threading the whole session through them. Every record is persisted
/// immediately; a write failure is logged and the run continues.
#[derive(Clone)]
pub struct SessionJournal {
    dir: PathBuf,
    state: Arc<Mutex<SyncSessionState>>,
}

impl SessionJournal {
    pub fn new(state: SyncSessionState, dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> SyncSessionState {
        self.state.lock().unwrap().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SyncSessionState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn save(&self) -> Result<()> {
        self.state.lock().unwrap().save(&self.dir)
    }

    fn save_quiet(&self) {
        if let Err(e) = self.save() {
            warn!("Could not persist session journal: {}", e);
        }
    }

    pub fn record_downloaded(&self, path: &str) {
        self.update(|s| {
            if !s.downloaded.iter().any(|p| p == path) {
                s.downloaded.push(path.to_string());
            }
        });
        self.save_quiet();
    }

    pub fn record_scanned(&self, paths: &[String]) {
        self.update(|s| {
            for path in paths {
                if !s.scanned.iter().any(|p| p == path) {
                    s.scanned.push(path.clone());
                }
            }
        });
        self.save_quiet();
    }

    pub fn record_uploaded(&self, paths: &[String]) {
        self.update(|s| {
            for path in paths {
                if !s.uploaded.iter().any(|p| p == path) {
                    s.uploaded.push(path.clone());
                }
            }
        });
        self.save_quiet();
    }

    pub fn set_paused(&self, paused: bool) {
        self.update(|s| s.paused = paused);
        self.save_quiet();
    }
}
