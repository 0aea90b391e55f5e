//! Sync orchestration: drives the pull, clean, and cloud phases as one
//! resumable state machine.
//!
//! When both sides are configured the pull and cloud phases run in
//! parallel, bridged by the streaming queue; otherwise phases run
//! sequentially. Session state is persisted at every boundary so an
//! interrupted run resumes instead of restarting.

pub mod cloud;
pub mod pull;
pub mod queue;

use crate::config::PortalConfig;
use crate::manifest;
use crate::session::{PhaseStatus, SessionJournal, SyncSessionState};
use crate::shield::{ArchiveEngine, CleanupStats, Shield};
use crate::transfer::progress::TransferTick;
use crate::transfer::TransferExecutor;
use crate::utils::errors::{Result, SyncError};
use chrono::Utc;
use cloud::CloudPhase;
use pull::{PullOutcome, PullPhase};
use queue::StreamingQueue;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PULL_WEIGHT: f64 = 0.45;
const CLEAN_WEIGHT: f64 = 0.10;
const CLOUD_WEIGHT: f64 = 0.45;

/// Externally visible phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Pull,
    Clean,
    Cloud,
    /// Pull and cloud running in parallel.
    Syncing,
    Done,
    Error,
}

/// One progress snapshot, emitted on every meaningful change.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    /// Blended 0-100 across all phases.
    pub percentage: u8,
    pub message: String,
    pub paused: bool,
    pub download: Option<TransferTick>,
    pub upload: Option<TransferTick>,
    pub shield: Option<CleanupStats>,
}

pub type ProgressSink = dyn Fn(SyncProgress) + Send + Sync;

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub session_id: String,
    pub files_pulled: usize,
    pub files_uploaded: usize,
    pub bytes_transferred: u64,
    pub shield: CleanupStats,
}

#[derive(Default)]
struct ReporterState {
    pull_pct: f64,
    clean_pct: f64,
    cloud_pct: f64,
    pull_active: bool,
    cloud_active: bool,
    phase: SyncPhase,
    message: String,
    download: Option<TransferTick>,
    upload: Option<TransferTick>,
    shield: Option<CleanupStats>,
}

/// Blends per-phase progress into one percentage and forwards snapshots to
/// the caller's sink.
struct Reporter {
    sink: Arc<ProgressSink>,
    executor: Arc<TransferExecutor>,
    state: Mutex<ReporterState>,
}

impl Reporter {
    fn new(sink: Arc<ProgressSink>, executor: Arc<TransferExecutor>) -> Self {
        Self {
            sink,
            executor,
            state: Mutex::new(ReporterState::default()),
        }
    }

    fn set_phase(&self, phase: SyncPhase, message: &str) {
        {
            let mut s = self.state.lock().unwrap();
            s.phase = phase;
            s.message = message.to_string();
            match phase {
                SyncPhase::Pull => s.pull_active = true,
                SyncPhase::Cloud => s.cloud_active = true,
                _ => {}
            }
        }
        self.emit();
    }

    fn pull_tick(&self, tick: TransferTick) {
        {
            let mut s = self.state.lock().unwrap();
            s.pull_pct = tick.percentage as f64;
            s.download = Some(tick);
        }
        self.emit();
    }

    fn cloud_tick(&self, tick: TransferTick) {
        {
            let mut s = self.state.lock().unwrap();
            s.cloud_pct = tick.percentage as f64;
            s.upload = Some(tick);
        }
        self.emit();
    }

    fn shield_update(&self, stats: CleanupStats) {
        {
            let mut s = self.state.lock().unwrap();
            if stats.total_archives > 0 {
                s.clean_pct =
                    (stats.scanned_archives as f64 / stats.total_archives as f64) * 100.0;
            }
            s.shield = Some(stats);
        }
        self.emit();
    }

    fn complete_pull(&self) {
        let mut s = self.state.lock().unwrap();
        s.pull_pct = 100.0;
        s.pull_active = false;
        drop(s);
        self.emit();
    }

    fn complete_clean(&self) {
        self.state.lock().unwrap().clean_pct = 100.0;
        self.emit();
    }

    fn complete_cloud(&self) {
        let mut s = self.state.lock().unwrap();
        s.cloud_pct = 100.0;
        s.cloud_active = false;
        drop(s);
        self.emit();
    }

    fn finish(&self, message: &str) {
        {
            let mut s = self.state.lock().unwrap();
            s.phase = SyncPhase::Done;
            s.message = message.to_string();
            s.pull_active = false;
            s.cloud_active = false;
        }
        self.emit();
    }

    /// Total bytes seen across both directions' last ticks.
    fn bytes_transferred(&self) -> u64 {
        let s = self.state.lock().unwrap();
        s.download.as_ref().map_or(0, |t| t.bytes)
            + s.upload.as_ref().map_or(0, |t| t.bytes)
    }

    fn fail(&self, message: &str) {
        {
            let mut s = self.state.lock().unwrap();
            s.phase = SyncPhase::Error;
            s.message = message.to_string();
            s.pull_active = false;
            s.cloud_active = false;
        }
        self.emit();
    }

    fn emit(&self) {
        let snapshot = {
            let s = self.state.lock().unwrap();
            let blended = s.pull_pct * PULL_WEIGHT
                + s.clean_pct * CLEAN_WEIGHT
                + s.cloud_pct * CLOUD_WEIGHT;
            let phase = if s.pull_active && s.cloud_active {
                SyncPhase::Syncing
            } else {
                s.phase
            };
            SyncProgress {
                phase,
                percentage: blended.clamp(0.0, 100.0) as u8,
                message: s.message.clone(),
                paused: self.executor.is_paused(),
                download: s.download.clone(),
                upload: s.upload.clone(),
                shield: s.shield.clone(),
            }
        };
        (self.sink)(snapshot);
    }
}

/// A clean-phase error maps to the session status it leaves behind.
fn clean_failure_status(e: &SyncError) -> PhaseStatus {
    match e {
        SyncError::ShieldIncomplete { .. } => PhaseStatus::Incomplete,
        _ => PhaseStatus::Failed,
    }
}

/// Drives one sync run end to end.
pub struct Orchestrator {
    config: PortalConfig,
    config_path: Option<std::path::PathBuf>,
    executor: Arc<TransferExecutor>,
    cancel: CancellationToken,
    /// Journal of the in-flight run, so pause/resume can be persisted.
    journal: Mutex<Option<SessionJournal>>,
}

impl Orchestrator {
    pub fn new(config: PortalConfig, config_path: Option<std::path::PathBuf>) -> Self {
        let executor = Arc::new(TransferExecutor::new(
            &config.rclone_binary,
            config.rclone_config.clone(),
        ));
        Self {
            config,
            config_path,
            executor,
            cancel: CancellationToken::new(),
            journal: Mutex::new(None),
        }
    }

    pub fn pause(&self) {
        self.executor.pause();
        if let Some(journal) = self.journal.lock().unwrap().as_ref() {
            journal.set_paused(true);
        }
    }

    pub fn resume(&self) {
        self.executor.resume();
        if let Some(journal) = self.journal.lock().unwrap().as_ref() {
            journal.set_paused(false);
        }
    }

    /// Abort the run: cancels cooperative work and kills live transfers.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.executor.stop();
    }

    pub fn is_paused(&self) -> bool {
        self.executor.is_paused()
    }

    pub async fn run(&self, on_progress: Arc<ProgressSink>) -> Result<SyncSummary> {
        let local_dir = self.config.local_dir.clone();
        std::fs::create_dir_all(&local_dir)?;
        self.executor.reset();

        let session = match SyncSessionState::load(&local_dir) {
            Some(s) if s.is_resumable() => {
                info!("Resuming interrupted session {}", s.session_id);
                s
            }
            _ => SyncSessionState::new(&uuid::Uuid::new_v4().to_string()),
        };
        let journal = SessionJournal::new(session, &local_dir);
        journal.save()?;
        *self.journal.lock().unwrap() = Some(journal.clone());

        let reporter = Arc::new(Reporter::new(on_progress, self.executor.clone()));
        let shield = Shield::new(
            &local_dir,
            self.config.policy,
            self.config.download_mode,
            ArchiveEngine::detect(),
            self.cancel.clone(),
        );
        if self.config.enable_shield && !shield.has_engine() {
            warn!("No archive tool (7z/rar) on PATH, shield runs degraded");
        }

        let result = self.run_phases(&journal, &shield, &reporter).await;
        *self.journal.lock().unwrap() = None;
        match result {
            Ok(summary) => {
                SyncSessionState::clear(&local_dir)?;
                self.persist_stats(&summary);
                reporter.finish("Sync complete");
                Ok(summary)
            }
            Err(SyncError::Aborted) => {
                if let Err(e) = journal.save() {
                    warn!("Could not persist session after stop: {}", e);
                }
                reporter.finish("Stopped by user");
                Err(SyncError::Aborted)
            }
            Err(e) => {
                journal.update(|s| s.record_error(&e.to_string()));
                if let Err(save_err) = journal.save() {
                    warn!("Could not persist session after error: {}", save_err);
                }
                reporter.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run_phases(
        &self,
        journal: &SessionJournal,
        shield: &Shield,
        reporter: &Arc<Reporter>,
    ) -> Result<SyncSummary> {
        let resume = journal.snapshot();
        let pull_needed = self.config.pull_enabled() && resume.pull != PhaseStatus::Done;
        let clean_needed = self.config.enable_shield && resume.clean != PhaseStatus::Done;
        let cloud_needed = self.config.cloud_enabled() && resume.cloud != PhaseStatus::Done;

        if !pull_needed {
            if self.config.pull_enabled() {
                info!("Pull already done in this session, skipping");
            }
            reporter.complete_pull();
        }
        if !clean_needed {
            if resume.clean != PhaseStatus::Done {
                journal.update(|s| s.clean = PhaseStatus::Skipped);
            }
            reporter.complete_clean();
        }
        if !cloud_needed {
            if !self.config.cloud_enabled() {
                journal.update(|s| s.cloud = PhaseStatus::Skipped);
            }
            reporter.complete_cloud();
        }

        let mut files_pulled = resume.files_pulled;
        let mut files_uploaded = resume.files_uploaded;

        if pull_needed && cloud_needed {
            // Parallel mode: approved files stream into the uploader while
            // the pull is still in flight. Files a previous run already
            // uploaded never re-enter the queue.
            let q = StreamingQueue::new();
            for path in &resume.uploaded {
                q.seed_seen(path.clone());
            }
            journal.update(|s| {
                s.pull = PhaseStatus::Running;
                s.cloud = PhaseStatus::Running;
            });
            journal.save()?;

            let pull_phase = self.pull_phase(shield, Some(q.clone()), journal, reporter)?;
            let cloud_phase = self.cloud_phase(journal, reporter)?;

            let producer = async {
                reporter.set_phase(SyncPhase::Pull, "Pulling from source");
                let pull_result = pull_phase.run().await;
                reporter.complete_pull();
                let clean_result = if pull_result.is_err() {
                    Ok(())
                } else if clean_needed {
                    self.clean_phase(shield, Some(&q), journal, reporter).await
                } else {
                    self.refresh_manifest().await
                };
                q.mark_complete();
                (pull_result, clean_result)
            };

            reporter.set_phase(SyncPhase::Cloud, "Uploading to backup");
            let ((pull_res, clean_res), cloud_res) =
                tokio::join!(producer, cloud_phase.run_streaming(&q));

            journal.update(|s| {
                s.pull = if pull_res.is_ok() {
                    PhaseStatus::Done
                } else {
                    PhaseStatus::Failed
                };
                if clean_needed {
                    s.clean = match (&pull_res, &clean_res) {
                        (Ok(_), Ok(())) => PhaseStatus::Done,
                        (Ok(_), Err(e)) => clean_failure_status(e),
                        // The sweep never ran; leave it for the resume.
                        (Err(_), _) => PhaseStatus::Pending,
                    };
                }
                if cloud_res.is_err() {
                    s.cloud = PhaseStatus::Failed;
                }
            });
            journal.save()?;

            let outcome: PullOutcome = pull_res?;
            clean_res?;
            let uploaded = cloud_res?;
            files_pulled += outcome.files_pulled;
            files_uploaded += uploaded;
            journal.update(|s| {
                s.files_pulled = files_pulled;
                s.files_uploaded = files_uploaded;
                s.cloud = PhaseStatus::Done;
            });
            journal.save()?;
            reporter.complete_cloud();
        } else {
            if pull_needed {
                journal.update(|s| s.pull = PhaseStatus::Running);
                journal.save()?;
                reporter.set_phase(SyncPhase::Pull, "Pulling from source");

                let phase = self.pull_phase(shield, None, journal, reporter)?;
                match phase.run().await {
                    Ok(outcome) => {
                        files_pulled += outcome.files_pulled;
                        journal.update(|s| {
                            s.files_pulled = files_pulled;
                            s.pull = PhaseStatus::Done;
                        });
                        journal.save()?;
                        reporter.complete_pull();
                    }
                    Err(e) => {
                        journal.update(|s| s.pull = PhaseStatus::Failed);
                        journal.save()?;
                        return Err(e);
                    }
                }
            }

            if clean_needed {
                journal.update(|s| s.clean = PhaseStatus::Running);
                journal.save()?;
                match self.clean_phase(shield, None, journal, reporter).await {
                    Ok(()) => {
                        journal.update(|s| s.clean = PhaseStatus::Done);
                        journal.save()?;
                    }
                    Err(e) => {
                        journal.update(|s| s.clean = clean_failure_status(&e));
                        journal.save()?;
                        return Err(e);
                    }
                }
            } else if self.config.pull_enabled() {
                // The uploader still needs an up-to-date inventory.
                self.refresh_manifest().await?;
            }

            if cloud_needed {
                journal.update(|s| s.cloud = PhaseStatus::Running);
                journal.save()?;
                reporter.set_phase(SyncPhase::Cloud, "Uploading to backup");

                let phase = self.cloud_phase(journal, reporter)?;
                match phase.run_manifest().await {
                    Ok(uploaded) => {
                        files_uploaded += uploaded;
                        journal.update(|s| {
                            s.files_uploaded = files_uploaded;
                            s.cloud = PhaseStatus::Done;
                        });
                        journal.save()?;
                        reporter.complete_cloud();
                    }
                    Err(e) => {
                        journal.update(|s| s.cloud = PhaseStatus::Failed);
                        journal.save()?;
                        return Err(e);
                    }
                }
            }
        }

        Ok(SyncSummary {
            session_id: journal.snapshot().session_id,
            files_pulled,
            files_uploaded,
            bytes_transferred: reporter.bytes_transferred(),
            shield: shield.stats(),
        })
    }

    /// Clean phase: the full shield sweep, approval of salvaged payloads,
    /// and the final manifest refresh. A sweep that ends early approves
    /// nothing beyond its salvage and fails the run: unscanned content must
    /// never reach the backup.
    async fn clean_phase(
        &self,
        shield: &Shield,
        queue: Option<&StreamingQueue>,
        journal: &SessionJournal,
        reporter: &Arc<Reporter>,
    ) -> Result<()> {
        reporter.set_phase(SyncPhase::Clean, "Scanning library");

        let s = shield.clone();
        let rep = reporter.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            s.sweep(&move |stats| rep.shield_update(stats))
        })
        .await
        .map_err(|e| SyncError::Transfer(format!("shield task failed: {}", e)))?;

        journal.record_scanned(&outcome.scanned);

        if !outcome.completed {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Aborted);
            }
            warn!(
                "Shield sweep ended early, {} archives unscanned",
                outcome.unscanned.len()
            );
            // Salvaged payloads came out of classified archives and are
            // safe; everything else stays unapproved and the manifest is
            // left unrefreshed.
            if let Some(q) = queue {
                for rel in shield.stats().extracted_paths {
                    q.push(rel);
                }
            }
            return Err(SyncError::ShieldIncomplete {
                unscanned: outcome.unscanned.len(),
            });
        }

        if let Some(q) = queue {
            for rel in shield.stats().extracted_paths {
                q.push(rel);
            }
            // Fallback: everything that survived the sweep is approved,
            // except ledgered offenders whose disposal may have failed.
            // The queue drops paths already uploaded this session.
            let offenders = shield.ledger().offender_set();
            for rel in manifest::local_files(&self.config.local_dir) {
                if !offenders.contains(&rel) {
                    q.push(rel);
                }
            }
        }

        self.refresh_manifest().await?;
        reporter.complete_clean();
        Ok(())
    }

    async fn refresh_manifest(&self) -> Result<()> {
        let dir = self.config.local_dir.clone();
        let policy = self.config.policy;
        tokio::task::spawn_blocking(move || manifest::update_upsync_manifest(&dir, policy))
            .await
            .map_err(|e| SyncError::Transfer(format!("manifest task failed: {}", e)))??;
        Ok(())
    }

    fn pull_phase(
        &self,
        shield: &Shield,
        queue: Option<StreamingQueue>,
        journal: &SessionJournal,
        reporter: &Arc<Reporter>,
    ) -> Result<PullPhase> {
        let source = self
            .config
            .source_remote
            .clone()
            .ok_or_else(|| SyncError::Config("source remote not configured".to_string()))?;
        let rep = reporter.clone();
        Ok(PullPhase {
            local_dir: self.config.local_dir.clone(),
            source,
            backup: self.config.backup_destination(),
            transfers: self.config.downsync_transfers as usize,
            mode: self.config.download_mode,
            policy: self.config.policy,
            strict_mirror: self.config.strict_mirror,
            shield: shield.clone(),
            shield_enabled: self.config.enable_shield,
            executor: self.executor.clone(),
            queue,
            journal: journal.clone(),
            already_downloaded: journal.snapshot().downloaded_set(),
            cancel: self.cancel.clone(),
            on_tick: Arc::new(move |tick| rep.pull_tick(tick)),
        })
    }

    fn cloud_phase(
        &self,
        journal: &SessionJournal,
        reporter: &Arc<Reporter>,
    ) -> Result<CloudPhase> {
        let destination = self
            .config
            .backup_destination()
            .ok_or_else(|| SyncError::Config("backup remote not configured".to_string()))?;
        let rep = reporter.clone();
        Ok(CloudPhase {
            local_dir: self.config.local_dir.clone(),
            destination,
            transfers: self.config.upsync_transfers as usize,
            executor: self.executor.clone(),
            journal: journal.clone(),
            on_tick: Arc::new(move |tick| rep.cloud_tick(tick)),
        })
    }

    /// Write run summaries back into the config file.
    fn persist_stats(&self, summary: &SyncSummary) {
        let Some(path) = &self.config_path else {
            return;
        };
        let mut config = self.config.clone();
        config.last_sync_stats = Some(crate::config::LastSyncStats {
            timestamp: Utc::now().timestamp(),
            files_processed: summary.files_pulled + summary.files_uploaded,
            bytes_transferred: summary.bytes_transferred,
            status: "success".to_string(),
        });
        config.last_shield_stats = Some(crate::config::LastShieldStats {
            timestamp: Utc::now().timestamp(),
            scanned_archives: summary.shield.scanned_archives,
            garbage_hits: summary.shield.garbage_hits,
            extracted_files: summary.shield.extracted_files,
        });
        if let Err(e) = config.save(path) {
            warn!("Could not write stats back to config: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortalConfig;

    fn sink() -> (Arc<ProgressSink>, Arc<Mutex<Vec<SyncProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sink: Arc<ProgressSink> = Arc::new(move |p| s.lock().unwrap().push(p));
        (sink, seen)
    }

    fn idle_executor() -> Arc<TransferExecutor> {
        Arc::new(TransferExecutor::new("rclone", None))
    }

    #[test]
    fn test_reporter_blends_weights() {
        let (s, seen) = sink();
        let reporter = Reporter::new(s, idle_executor());
        reporter.complete_pull();
        reporter.complete_clean();
        // pull 45% + clean 10%, cloud still at 0
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.percentage, 55);

        reporter.complete_cloud();
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.percentage, 100);
    }

    #[test]
    fn test_reporter_folds_parallel_phases() {
        let (s, seen) = sink();
        let reporter = Reporter::new(s, idle_executor());
        reporter.set_phase(SyncPhase::Pull, "pulling");
        reporter.set_phase(SyncPhase::Cloud, "uploading");
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.phase, SyncPhase::Syncing);

        reporter.complete_pull();
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.phase, SyncPhase::Cloud);
    }

    #[test]
    fn test_progress_surfaces_paused_state() {
        let (s, seen) = sink();
        let executor = idle_executor();
        let reporter = Reporter::new(s, executor.clone());

        reporter.set_phase(SyncPhase::Pull, "pulling");
        assert!(!seen.lock().unwrap().last().unwrap().paused);

        executor.pause();
        reporter.complete_pull();
        assert!(seen.lock().unwrap().last().unwrap().paused);
    }

    #[tokio::test]
    async fn test_run_with_nothing_configured_completes() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = PortalConfig::for_dir(temp.path().to_path_buf());
        config.enable_shield = false;

        let orch = Orchestrator::new(config, None);
        let (s, seen) = sink();
        let summary = orch.run(s).await.unwrap();

        assert_eq!(summary.files_pulled, 0);
        assert_eq!(summary.files_uploaded, 0);
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.phase, SyncPhase::Done);
        // Finished cleanly: no session file left behind
        assert!(SyncSessionState::load(temp.path()).is_none());
    }

    #[tokio::test]
    async fn test_shield_only_run_cleans_library() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("lpk.dll"), b"x").unwrap();
        std::fs::write(temp.path().join("board.tvw"), b"x").unwrap();

        let config = PortalConfig::for_dir(temp.path().to_path_buf());
        let orch = Orchestrator::new(config, None);
        let (s, _) = sink();
        let summary = orch.run(s).await.unwrap();

        assert!(!temp.path().join("lpk.dll").exists());
        assert!(temp.path().join("board.tvw").exists());
        assert_eq!(summary.shield.standalone_flagged, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_incomplete_sweep_fails_run_and_approves_nothing() {
        use crate::config::{DisposalPolicy, DownloadMode};
        use crate::manifest::UPSYNC_MANIFEST;
        use crate::shield::{ArchiveEngine, EngineKind, QUARANTINE_DIR};
        use std::os::unix::fs::PermissionsExt;

        // Every listing reports malware; extraction is a no-op.
        let tools = tempfile::TempDir::new().unwrap();
        let bin = tools.path().join("fake7z");
        std::fs::write(&bin, "#!/bin/sh\n[ \"$1\" = l ] && echo crack.exe\nexit 0\n")
            .unwrap();
        let mut perms = std::fs::metadata(&bin).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&bin, perms).unwrap();

        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("aa")).unwrap();
        std::fs::write(temp.path().join("aa/bad.zip"), b"zip").unwrap();
        std::fs::write(temp.path().join("zz-later.zip"), b"zip").unwrap();
        std::fs::write(temp.path().join("board.tvw"), b"x").unwrap();
        // Squat the quarantine destination so the isolate copy fails
        std::fs::create_dir_all(temp.path().join(QUARANTINE_DIR).join("bad.zip")).unwrap();

        let mut config = PortalConfig::for_dir(temp.path().to_path_buf());
        config.policy = DisposalPolicy::Isolate;
        let orch = Orchestrator::new(config, None);

        let shield = Shield::new(
            temp.path(),
            DisposalPolicy::Isolate,
            DownloadMode::Full,
            Some(ArchiveEngine::new(EngineKind::SevenZip, bin)),
            CancellationToken::new(),
        );
        let journal = SessionJournal::new(SyncSessionState::new("t"), temp.path());
        let (s, _) = sink();
        let reporter = Arc::new(Reporter::new(s, orch.executor.clone()));
        let q = StreamingQueue::new();

        let err = orch
            .clean_phase(&shield, Some(&q), &journal, &reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ShieldIncomplete { unscanned: 1 }));

        // Neither the undisposed flagged archive nor the unscanned one was
        // approved, and no survivor fallback ran
        q.mark_complete();
        assert!(q.next_batch(10).await.is_none());
        // The upsync manifest was not refreshed over unverified content
        assert!(!temp.path().join(UPSYNC_MANIFEST).exists());
        // The run would resume the clean phase
        assert_eq!(clean_failure_status(&err), PhaseStatus::Incomplete);
    }
}
