//! Cloud phase: upload shield-approved content to the backup remote.
//!
//! Two shapes: a streaming uploader that drains the queue in batches while
//! the pull is still running, and a manifest uploader that mirrors whatever
//! the upsync manifest lists (used for sequential runs and resumes).

use crate::manifest::{self, Manifest, UPSYNC_MANIFEST};
use crate::session::SessionJournal;
use crate::sync::queue::{StreamingQueue, UPLOAD_BATCH};
use crate::transfer::progress::{Direction, TransferTick};
use crate::transfer::{TransferEvent, TransferExecutor};
use crate::utils::errors::{Result, SyncError};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct CloudPhase {
    pub local_dir: std::path::PathBuf,
    pub destination: String,
    pub transfers: usize,
    pub executor: Arc<TransferExecutor>,
    pub journal: SessionJournal,
    pub on_tick: Arc<dyn Fn(TransferTick) + Send + Sync>,
}

impl CloudPhase {
    /// Drain the queue until the producer completes, uploading each batch
    /// with an explicit file list. A failed batch is released back to the
    /// queue before the error propagates.
    pub async fn run_streaming(&self, queue: &StreamingQueue) -> Result<usize> {
        let mut uploaded = 0usize;
        while let Some(batch) = queue.next_batch(UPLOAD_BATCH).await {
            queue.mark_pending(&batch);
            match self.upload_batch(&batch).await {
                Ok(()) => {
                    uploaded += batch.len();
                    queue.clear_pending(&batch);
                    self.journal.record_uploaded(&batch);
                }
                Err(e) => {
                    queue.release_pending();
                    return Err(e);
                }
            }
        }
        // Always finish with the manifest so the remote inventory matches.
        self.upload_manifest().await?;
        info!("Streaming upload finished: {} files", uploaded);
        Ok(uploaded)
    }

    /// Upload everything the upsync manifest lists, then the manifest
    /// itself. Refuses to run without a manifest: uploading unverified
    /// content defeats the shield.
    pub async fn run_manifest(&self) -> Result<usize> {
        let manifest_path = self.local_dir.join(UPSYNC_MANIFEST);
        if !manifest_path.exists() {
            return Err(SyncError::ManifestUnavailable(
                "upsync manifest missing, run a pull first".to_string(),
            ));
        }
        let manifest = Manifest::parse(&std::fs::read_to_string(&manifest_path)?);
        if manifest.files.is_empty() {
            warn!("Upsync manifest is empty, nothing to upload");
            self.upload_manifest().await?;
            return Ok(0);
        }

        let local = manifest::local_files(&self.local_dir);
        let present: Vec<String> = manifest
            .files
            .iter()
            .filter(|f| local.contains(*f))
            .cloned()
            .collect();
        if present.len() < manifest.files.len() {
            warn!(
                "{} manifest entries missing locally, uploading the rest",
                manifest.files.len() - present.len()
            );
        }

        let already = self.journal.snapshot().uploaded_set();
        let todo: Vec<String> = present
            .into_iter()
            .filter(|f| !already.contains(f))
            .collect();
        if !already.is_empty() {
            info!(
                "{} entries already uploaded this session, {} to go",
                already.len(),
                todo.len()
            );
        }

        self.upload_batch(&todo).await?;
        self.journal.record_uploaded(&todo);
        self.upload_manifest().await?;
        info!("Manifest upload finished: {} files", todo.len());
        Ok(todo.len())
    }

    async fn upload_batch(&self, batch: &[String]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut list = tempfile::NamedTempFile::new()?;
        for file in batch {
            writeln!(list, "{}", file)?;
        }
        list.flush()?;

        let args = vec![
            "copy".to_string(),
            self.local_dir.display().to_string(),
            self.destination.clone(),
            "--files-from".to_string(),
            list.path().display().to_string(),
            "--transfers".to_string(),
            self.transfers.to_string(),
        ];
        self.run_with_ticks(&args).await
    }

    async fn upload_manifest(&self) -> Result<()> {
        let manifest_path = self.local_dir.join(UPSYNC_MANIFEST);
        if !manifest_path.exists() {
            return Ok(());
        }
        let args = vec![
            "copyto".to_string(),
            manifest_path.display().to_string(),
            format!("{}/{}", self.destination, UPSYNC_MANIFEST),
        ];
        self.executor.run(&args, Direction::Upload, None).await
    }

    async fn run_with_ticks(&self, args: &[String]) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let on_tick = self.on_tick.clone();
        let consumer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let TransferEvent::Tick { tick, .. } = event {
                    on_tick(tick);
                }
            }
        });
        let result = self.executor.run(args, Direction::Upload, Some(&tx)).await;
        drop(tx);
        let _ = consumer.await;
        result
    }
}
