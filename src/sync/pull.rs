//! Pull phase: manifest-driven download from the source remote with
//! real-time shield cleaning.
//!
//! Known-risky files are staged first so the shield neutralizes them before
//! the bulk transfer starts. During the bulk pull every completed file is
//! cleaned as it lands, approved survivors stream into the upload queue,
//! and the upsync manifest is refreshed incrementally so an interrupted
//! run leaves an honest inventory behind.

use crate::config::{DisposalPolicy, DownloadMode};
use crate::manifest::{self, Manifest, SOURCE_MANIFEST};
use crate::session::SessionJournal;
use crate::shield::{patterns, Shield};
use crate::sync::queue::StreamingQueue;
use crate::transfer::progress::{Direction, TransferTick};
use crate::transfer::{TransferEvent, TransferExecutor};
use crate::utils::errors::{Result, SyncError};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Refresh the upsync manifest after this many cleaned files.
const MANIFEST_UPDATE_INTERVAL: usize = 8;

/// Everything the pull phase produced.
#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    pub files_pulled: usize,
    /// Whether a source manifest was available (false means discovery mode).
    pub manifest_driven: bool,
}

pub struct PullPhase {
    pub local_dir: PathBuf,
    pub source: String,
    pub backup: Option<String>,
    pub transfers: usize,
    pub mode: DownloadMode,
    pub policy: DisposalPolicy,
    /// Mirror deletions from the source in discovery mode.
    pub strict_mirror: bool,
    pub shield: Shield,
    /// When false, downloaded files are approved without inspection.
    pub shield_enabled: bool,
    pub executor: Arc<TransferExecutor>,
    pub queue: Option<StreamingQueue>,
    pub journal: SessionJournal,
    /// Paths a previous run of this session already fetched. They are not
    /// pulled again, even the ones the shield removed afterwards.
    pub already_downloaded: HashSet<String>,
    pub cancel: CancellationToken,
    pub on_tick: Arc<dyn Fn(TransferTick) + Send + Sync>,
}

impl PullPhase {
    pub async fn run(&self) -> Result<PullOutcome> {
        std::fs::create_dir_all(&self.local_dir)?;
        // The exclusion file must exist before the first rclone call.
        self.shield.ledger().regenerate_exclude_file()?;

        let mut outcome = PullOutcome::default();

        match self.fetch_manifest().await {
            Some(remote) => {
                outcome.manifest_driven = true;
                outcome.files_pulled = self.manifest_pull(remote).await?;
            }
            None => {
                info!("No source manifest available, falling back to discovery pull");
                outcome.files_pulled = self.discovery_pull().await?;
            }
        }

        if self.cancel.is_cancelled() {
            return Err(SyncError::Aborted);
        }

        Ok(outcome)
    }

    /// Try the source remote's manifest, then the cloud backup's copy.
    async fn fetch_manifest(&self) -> Option<Manifest> {
        let staging = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => {
                warn!("Cannot create manifest staging dir: {}", e);
                return None;
            }
        };
        let local_copy = staging.path().join(SOURCE_MANIFEST);

        let mut remotes = vec![format!("{}/{}", self.source, SOURCE_MANIFEST)];
        if let Some(backup) = &self.backup {
            remotes.push(format!("{}/{}", backup, SOURCE_MANIFEST));
        }

        for remote in remotes {
            let args = vec![
                "copyto".to_string(),
                remote.clone(),
                local_copy.display().to_string(),
            ];
            match self.executor.run(&args, Direction::Download, None).await {
                Ok(()) => match std::fs::read_to_string(&local_copy) {
                    Ok(text) => {
                        let m = Manifest::parse(&text);
                        info!("Manifest from {}: {} entries", remote, m.files.len());
                        return Some(m);
                    }
                    Err(e) => warn!("Manifest copy unreadable from {}: {}", remote, e),
                },
                Err(SyncError::Aborted) => return None,
                Err(e) => warn!("Manifest fetch from {} failed: {}", remote, e),
            }
        }
        None
    }

    /// Manifest-driven pull: diff, partition, staged transfers.
    async fn manifest_pull(&self, remote: Manifest) -> Result<usize> {
        let local = manifest::local_files(&self.local_dir);
        let mut excluded = self.shield.ledger().offender_set();
        excluded.extend(self.already_downloaded.iter().cloned());
        let mut missing = manifest::missing_files(&remote, &local, &excluded);

        if self.mode == DownloadMode::Lean {
            let before = missing.len();
            missing = manifest::lean_filter(missing);
            info!(
                "Lean filter: {} of {} candidates pass",
                missing.len(),
                before
            );
        }

        let split = manifest::partition(missing, self.mode == DownloadMode::Lean);
        info!(
            "Pull plan: {} risky, {} standard (of {} in manifest)",
            split.risky.len(),
            split.standard.len(),
            remote.files.len()
        );

        let mut pulled = 0;

        // Stage 1: known-risky names, cleaned and committed immediately.
        if !split.risky.is_empty() {
            pulled += self.pull_list(&split.risky, false).await?;
            for rel in &split.risky {
                self.journal.record_downloaded(rel);
                if !self.shield_enabled {
                    self.approve(rel.clone());
                    continue;
                }
                let abs = self.local_dir.join(rel);
                let shield = self.shield.clone();
                let removed =
                    tokio::task::spawn_blocking(move || shield.clean_path(&abs))
                        .await
                        .unwrap_or(true);
                if !removed {
                    self.approve(rel.clone());
                }
            }
            self.push_extracted();
            self.update_manifest().await?;
        }

        if self.cancel.is_cancelled() {
            return Err(SyncError::Aborted);
        }

        // Stage 2: the bulk, with real-time per-file cleaning.
        if !split.standard.is_empty() {
            pulled += self.pull_list(&split.standard, true).await?;
        }

        Ok(pulled)
    }

    /// Transfer an explicit file list. With `realtime` set, completed files
    /// are shield-cleaned as they arrive and survivors approved for upload.
    async fn pull_list(&self, files: &[String], realtime: bool) -> Result<usize> {
        let list = write_files_from(files)?;
        let args = vec![
            "copy".to_string(),
            self.source.clone(),
            self.local_dir.display().to_string(),
            "--files-from".to_string(),
            list.path().display().to_string(),
            "--transfers".to_string(),
            self.transfers.to_string(),
        ];

        if !realtime {
            self.executor.run(&args, Direction::Download, None).await?;
            return Ok(files.len());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = self.spawn_realtime_consumer(rx, files.len());
        let run_result = self.executor.run(&args, Direction::Download, Some(&tx)).await;
        drop(tx);
        let completed = consumer.await.unwrap_or(0);
        run_result?;
        Ok(completed)
    }

    /// Consume transfer events: forward ticks, clean completed files, push
    /// survivors, refresh the manifest incrementally.
    fn spawn_realtime_consumer(
        &self,
        mut rx: mpsc::UnboundedReceiver<TransferEvent>,
        expected: usize,
    ) -> tokio::task::JoinHandle<usize> {
        let shield = self.shield.clone();
        let shield_enabled = self.shield_enabled;
        let queue = self.queue.clone();
        let journal = self.journal.clone();
        let local_dir = self.local_dir.clone();
        let policy = self.policy;
        let on_tick = self.on_tick.clone();
        let interval = MANIFEST_UPDATE_INTERVAL.min(expected.max(1));

        tokio::spawn(async move {
            let mut completed = 0usize;
            let mut since_update = 0usize;
            while let Some(event) = rx.recv().await {
                match event {
                    TransferEvent::Tick { tick, .. } => on_tick(tick),
                    TransferEvent::FileCompleted { path, .. } => {
                        completed += 1;
                        journal.record_downloaded(&path);
                        let removed = if shield_enabled {
                            let abs = local_dir.join(&path);
                            let s = shield.clone();
                            tokio::task::spawn_blocking(move || s.clean_path(&abs))
                                .await
                                .unwrap_or_else(|e| {
                                    error!("Shield task failed for {}: {}", path, e);
                                    true
                                })
                        } else {
                            false
                        };
                        if !removed {
                            if let Some(q) = &queue {
                                q.push(path.clone());
                            }
                        }

                        since_update += 1;
                        if since_update >= interval {
                            since_update = 0;
                            let dir = local_dir.clone();
                            let res = tokio::task::spawn_blocking(move || {
                                manifest::update_upsync_manifest(&dir, policy)
                            })
                            .await;
                            if let Ok(Err(e)) = res {
                                warn!("Incremental manifest update failed: {}", e);
                            }
                        }
                    }
                }
            }
            completed
        })
    }

    /// No manifest anywhere: mirror the whole source, excluding ledgered
    /// offenders and (in lean mode) bloat directories, then rely on the
    /// final sweep.
    async fn discovery_pull(&self) -> Result<usize> {
        let verb = if self.strict_mirror { "sync" } else { "copy" };
        let mut args = vec![
            verb.to_string(),
            self.source.clone(),
            self.local_dir.display().to_string(),
            "--exclude-from".to_string(),
            self.shield.ledger().exclude_file_path().display().to_string(),
            "--transfers".to_string(),
            self.transfers.to_string(),
        ];
        if self.mode == DownloadMode::Lean {
            for keyword in patterns::LEAN_EXCLUDE_SEGMENTS {
                args.push("--exclude".to_string());
                args.push(format!("**/{}/**", keyword));
                args.push("--exclude".to_string());
                args.push(format!("{}/**", keyword));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = self.spawn_realtime_consumer(rx, usize::MAX);
        let run_result = self.executor.run(&args, Direction::Download, Some(&tx)).await;
        drop(tx);
        let completed = consumer.await.unwrap_or(0);
        run_result?;
        Ok(completed)
    }

    /// Approve payloads salvaged out of flagged archives for upload.
    fn push_extracted(&self) {
        if let Some(q) = &self.queue {
            for rel in self.shield.stats().extracted_paths {
                q.push(rel);
            }
        }
    }

    fn approve(&self, rel: String) {
        if let Some(q) = &self.queue {
            q.push(rel);
        }
    }

    async fn update_manifest(&self) -> Result<()> {
        let dir = self.local_dir.clone();
        let policy = self.policy;
        tokio::task::spawn_blocking(move || manifest::update_upsync_manifest(&dir, policy))
            .await
            .map_err(|e| SyncError::Transfer(format!("manifest task failed: {}", e)))??;
        Ok(())
    }
}

/// Write a --files-from list to a temp file kept alive by the returned
/// handle.
fn write_files_from(files: &[String]) -> Result<tempfile::NamedTempFile> {
    let mut list = tempfile::NamedTempFile::new()?;
    for file in files {
        writeln!(list, "{}", file)?;
    }
    list.flush()?;
    Ok(list)
}
