//! Malware shield: inspects archives and standalone files against the
//! pattern catalog, salvages valuable payloads out of flagged archives, and
//! disposes of the rest according to the configured policy.
//!
//! The shield is a blocking component. Async callers run it through
//! `tokio::task::spawn_blocking`; cancellation is cooperative and checked
//! before every unit of work.

pub mod archive;
pub mod lean;
pub mod ledger;
pub mod patterns;

pub use archive::{is_archive, ArchiveEngine, EngineKind};
pub use ledger::{ExclusionLedger, QUARANTINE_DIR};

use crate::config::{DisposalPolicy, DownloadMode};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Ceiling on nested-archive processing rounds. Archives extracted from a
/// flagged parent are fed back through the same pipeline; this bounds
/// pathological self-referential nesting.
pub const MAX_NESTED_ROUNDS: usize = 10;

/// Counters accumulated during one shield run. Created per sweep, mutated
/// in place, surfaced via the progress callback after every unit of work.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupStats {
    pub total_archives: usize,
    pub scanned_archives: usize,
    pub current_archive: Option<String>,
    pub safe_pattern_hits: usize,
    pub garbage_hits: usize,
    pub clean_archives: usize,
    pub flagged_archives: usize,
    pub extracted_files: usize,
    pub purged_files: usize,
    pub isolated_files: usize,
    /// Archives whose listing could not be produced (flagged fail-safe).
    pub invalid_listings: usize,
    pub nested_found: usize,
    pub nested_cleaned: usize,
    pub standalone_total: usize,
    pub standalone_scanned: usize,
    pub standalone_flagged: usize,
    pub current_standalone: Option<String>,
    pub policy: DisposalPolicy,
    /// Relative paths salvaged out of flagged archives this run. These are
    /// exempt from standalone scanning and eligible for upsync approval.
    pub extracted_paths: Vec<String>,
}

/// Result of one full sweep.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub completed: bool,
    pub scanned: Vec<String>,
    pub unscanned: Vec<String>,
}

/// Verdict for a single archive.
#[derive(Debug, Clone, Default)]
struct ArchiveVerdict {
    flagged: bool,
    failed: bool,
    nested: Vec<PathBuf>,
}

/// Progress callback type; sweeps run on blocking threads so the callback
/// must be shareable across them.
pub type ShieldProgress = dyn Fn(CleanupStats) + Send + Sync;

/// The shield instance for one scan root. Cheap to clone; stats are shared.
#[derive(Clone)]
pub struct Shield {
    root: PathBuf,
    policy: DisposalPolicy,
    mode: DownloadMode,
    engine: Option<ArchiveEngine>,
    ledger: ExclusionLedger,
    cancel: CancellationToken,
    stats: Arc<Mutex<CleanupStats>>,
}

impl Shield {
    pub fn new(
        root: &Path,
        policy: DisposalPolicy,
        mode: DownloadMode,
        engine: Option<ArchiveEngine>,
        cancel: CancellationToken,
    ) -> Self {
        let stats = CleanupStats {
            policy,
            ..Default::default()
        };
        Self {
            root: root.to_path_buf(),
            policy,
            mode,
            engine,
            ledger: ExclusionLedger::new(root),
            cancel,
            stats: Arc::new(Mutex::new(stats)),
        }
    }

    pub fn ledger(&self) -> &ExclusionLedger {
        &self.ledger
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Snapshot of the current counters.
    pub fn stats(&self) -> CleanupStats {
        self.stats.lock().unwrap().clone()
    }

    fn with_stats<R>(&self, f: impl FnOnce(&mut CleanupStats) -> R) -> R {
        f(&mut self.stats.lock().unwrap())
    }

    /// Full sweep over the scan root: every archive, then every standalone
    /// file. Listing/extraction failures degrade per item and never abort
    /// the sweep; a failed disposal of flagged content ends it early.
    pub fn sweep(&self, on_progress: &ShieldProgress) -> SweepOutcome {
        let mut scanned = Vec::new();

        if self.engine.is_none() {
            // Degraded mode: no archive engine, standalone scanning only.
            warn!("Shield: no archive tool found, archive scanning skipped");
            self.scan_standalone_files(on_progress);
            on_progress(self.stats());
            return SweepOutcome {
                completed: true,
                scanned,
                unscanned: Vec::new(),
            };
        }

        let archives = self.collect_archives();
        self.with_stats(|s| s.total_archives = archives.len());
        on_progress(self.stats());

        let mut seen: HashSet<PathBuf> = archives.iter().cloned().collect();
        let mut queue: VecDeque<(PathBuf, usize)> =
            archives.into_iter().map(|a| (a, 0)).collect();

        while let Some((archive_path, depth)) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                let unscanned = std::iter::once(&archive_path)
                    .chain(queue.iter().map(|(p, _)| p))
                    .map(|p| self.rel(p))
                    .collect();
                return SweepOutcome {
                    completed: false,
                    scanned,
                    unscanned,
                };
            }
            if !archive_path.exists() {
                continue;
            }

            let rel = self.rel(&archive_path);
            self.with_stats(|s| {
                s.current_archive = Some(rel.clone());
                s.scanned_archives += 1;
            });
            on_progress(self.stats());

            let verdict = self.clean_archive(&archive_path);
            scanned.push(rel.clone());

            if verdict.failed {
                error!("Shield: failed to {} {}", self.policy, rel);
                let unscanned = queue.iter().map(|(p, _)| self.rel(p)).collect();
                return SweepOutcome {
                    completed: false,
                    scanned,
                    unscanned,
                };
            }

            self.with_stats(|s| {
                if verdict.flagged {
                    s.flagged_archives += 1;
                } else {
                    s.clean_archives += 1;
                }
                if depth > 0 {
                    s.nested_cleaned += 1;
                }
            });

            // Feed archives salvaged out of a flagged parent back through
            // the pipeline, up to the nesting ceiling.
            if depth < MAX_NESTED_ROUNDS {
                for nested in verdict.nested {
                    if seen.insert(nested.clone()) {
                        self.with_stats(|s| {
                            s.nested_found += 1;
                            s.total_archives += 1;
                        });
                        queue.push_back((nested, depth + 1));
                    }
                }
            }
            on_progress(self.stats());
        }

        self.with_stats(|s| s.current_archive = None);
        self.scan_standalone_files(on_progress);
        on_progress(self.stats());

        SweepOutcome {
            completed: true,
            scanned,
            unscanned: Vec::new(),
        }
    }

    /// Real-time entry point for a single freshly downloaded path: archives
    /// get the full listing treatment (nested ones included), everything
    /// else goes through the standalone check. Returns true when the path
    /// must not be kept: flagged content stays blocked even if its disposal
    /// failed and the bytes are still on disk.
    pub fn clean_path(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        if is_archive(path) {
            let mut removed = false;
            let mut queue: VecDeque<(PathBuf, usize)> =
                VecDeque::from([(path.to_path_buf(), 0usize)]);
            while let Some((p, depth)) = queue.pop_front() {
                if !p.exists() {
                    continue;
                }
                let verdict = self.clean_archive(&p);
                self.with_stats(|s| {
                    if verdict.flagged {
                        s.flagged_archives += 1;
                    } else {
                        s.clean_archives += 1;
                    }
                });
                if p == path {
                    removed = verdict.flagged;
                }
                if depth < MAX_NESTED_ROUNDS {
                    for nested in verdict.nested {
                        self.with_stats(|s| s.nested_found += 1);
                        queue.push_back((nested, depth + 1));
                    }
                }
            }
            removed
        } else {
            self.clean_file(path)
        }
    }

    /// Standalone-file check: extension safety is authoritative, then
    /// filename heuristics, then lean-mode whitelist enforcement.
    pub fn clean_file(&self, path: &Path) -> bool {
        let rel = self.rel(path);
        let filename = match path.file_name().and_then(|f| f.to_str()) {
            Some(f) => f.to_string(),
            None => return false,
        };

        // Payloads just salvaged out of a flagged archive are exempt.
        if self.with_stats(|s| s.extracted_paths.iter().any(|p| p == &rel)) {
            return false;
        }

        let flagged_by_name = patterns::is_risky_filename(&filename)
            || patterns::matches_garbage(&filename);

        match self.mode {
            DownloadMode::Full => {
                if patterns::is_keep_ext(&filename) {
                    return false;
                }
                if !flagged_by_name {
                    return false;
                }
                self.with_stats(|s| s.garbage_hits += 1);
                self.dispose_standalone(path, &rel, &filename, true)
            }
            DownloadMode::Lean => {
                if patterns::is_lean_keep_ext(&filename) {
                    return false;
                }
                if flagged_by_name {
                    self.with_stats(|s| s.garbage_hits += 1);
                    self.dispose_standalone(path, &rel, &filename, true)
                } else {
                    // Outside the strict whitelist: bloat, purged without a
                    // ledger entry.
                    self.dispose_standalone(path, &rel, &filename, false)
                }
            }
        }
    }

    fn dispose_standalone(
        &self,
        path: &Path,
        rel: &str,
        filename: &str,
        malicious: bool,
    ) -> bool {
        let result = if malicious {
            self.dispose(path, filename, self.policy)
        } else {
            // Lean bloat is always purged, never quarantined.
            self.dispose(path, filename, DisposalPolicy::Purge)
        };

        match result {
            Ok(()) => {
                if malicious {
                    self.with_stats(|s| s.standalone_flagged += 1);
                    if let Err(e) = self.ledger.add(rel) {
                        error!("Shield: failed to record offender {}: {}", rel, e);
                    }
                }
                true
            }
            Err(e) => {
                error!("Shield: failed to {} {}: {}", self.policy, rel, e);
                false
            }
        }
    }

    /// Inspect one archive and neutralize it if flagged.
    fn clean_archive(&self, archive_path: &Path) -> ArchiveVerdict {
        let engine = match &self.engine {
            Some(e) => e,
            None => return ArchiveVerdict::default(),
        };
        let rel = self.rel(archive_path);
        let filename = archive_path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("")
            .to_string();

        // Peek. A failed listing is treated fail-safe: the archive is
        // flagged as suspicious rather than silently skipped.
        let (listing, listing_failed) = match engine.list(archive_path) {
            Ok(text) => (text, false),
            Err(e) => {
                warn!("Shield: could not peek inside {}: {}", rel, e);
                self.with_stats(|s| s.invalid_listings += 1);
                (String::new(), true)
            }
        };

        let safe_hits = patterns::safe_pattern_hits(&listing);
        self.with_stats(|s| s.safe_pattern_hits += safe_hits);

        let known_bad = patterns::is_risky_filename(&filename);
        let flagged = listing_failed || known_bad || patterns::matches_garbage(&listing);

        if !flagged {
            if self.policy == DisposalPolicy::Extract {
                // Trust mode: unpack everything in place, drop the archive.
                return self.extract_in_place(engine, archive_path, &rel);
            }
            debug!("Shield: {} is clean", rel);
            return ArchiveVerdict::default();
        }

        self.with_stats(|s| s.garbage_hits += 1);
        info!(
            "Shield: {} flagged ({})",
            rel,
            if known_bad {
                "known-risky filename"
            } else if listing_failed {
                "invalid listing"
            } else {
                "garbage pattern in listing"
            }
        );

        let parent = archive_path
            .parent()
            .unwrap_or(&self.root)
            .to_path_buf();
        let before = self.snapshot_tree(&parent);

        // Salvage valuable payloads before any disposal, preserving the
        // archive's internal directory structure.
        for ext in patterns::KEEP_EXTS {
            if engine.extract(archive_path, &format!("*{}", ext), &parent) {
                self.with_stats(|s| s.extracted_files += 1);
            }
        }

        if self.policy == DisposalPolicy::Isolate {
            let quarantine = self.root.join(QUARANTINE_DIR);
            if let Err(e) = std::fs::create_dir_all(&quarantine) {
                error!("Shield: cannot create quarantine dir: {}", e);
            } else {
                for pattern in patterns::GARBAGE_PATTERNS {
                    engine.extract(archive_path, &format!("*{}*", pattern), &quarantine);
                }
            }
        }

        let (extracted, nested) = self.diff_tree(&parent, &before, archive_path);
        self.with_stats(|s| s.extracted_paths.extend(extracted));

        if let Err(e) = self.ledger.add(&rel) {
            error!("Shield: failed to record offender {}: {}", rel, e);
        }

        // Flagged content is never trusted: Extract behaves like Purge here.
        let disposal = match self.policy {
            DisposalPolicy::Isolate => DisposalPolicy::Isolate,
            _ => DisposalPolicy::Purge,
        };
        if let Err(e) = self.dispose(archive_path, &filename, disposal) {
            error!("Shield: failed to {} {}: {}", disposal, rel, e);
            return ArchiveVerdict {
                flagged: true,
                failed: true,
                nested,
            };
        }

        ArchiveVerdict {
            flagged: true,
            failed: false,
            nested,
        }
    }

    fn extract_in_place(
        &self,
        engine: &ArchiveEngine,
        archive_path: &Path,
        rel: &str,
    ) -> ArchiveVerdict {
        let parent = archive_path
            .parent()
            .unwrap_or(&self.root)
            .to_path_buf();
        let before = self.snapshot_tree(&parent);
        if engine.extract(archive_path, "*", &parent) {
            self.with_stats(|s| s.extracted_files += 1);
            let (extracted, nested) = self.diff_tree(&parent, &before, archive_path);
            self.with_stats(|s| s.extracted_paths.extend(extracted));
            if let Err(e) = std::fs::remove_file(archive_path) {
                error!("Shield: failed to remove unpacked archive {}: {}", rel, e);
            }
            ArchiveVerdict {
                flagged: false,
                failed: false,
                nested,
            }
        } else {
            warn!("Shield: trust-mode extraction failed for {}", rel);
            ArchiveVerdict::default()
        }
    }

    /// Purge deletes; isolate copies into quarantine then deletes the
    /// source (copy-then-delete is safe across filesystem boundaries).
    fn dispose(
        &self,
        path: &Path,
        filename: &str,
        policy: DisposalPolicy,
    ) -> std::io::Result<()> {
        match policy {
            DisposalPolicy::Isolate => {
                let quarantine = self.root.join(QUARANTINE_DIR);
                std::fs::create_dir_all(&quarantine)?;
                let dest = quarantine.join(filename);
                std::fs::copy(path, &dest)?;
                std::fs::remove_file(path)?;
                self.with_stats(|s| s.isolated_files += 1);
                Ok(())
            }
            _ => {
                std::fs::remove_file(path)?;
                self.with_stats(|s| s.purged_files += 1);
                Ok(())
            }
        }
    }

    /// All archives under the scan root, quarantine excluded.
    fn collect_archives(&self) -> Vec<PathBuf> {
        let mut archives = Vec::new();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != QUARANTINE_DIR)
            .flatten()
        {
            if entry.file_type().is_file() && is_archive(entry.path()) {
                archives.push(entry.path().to_path_buf());
            }
        }
        archives.sort();
        archives
    }

    /// Scan every non-archive file under the root with the standalone
    /// check. Filesystem failures skip the item; the scan continues.
    fn scan_standalone_files(&self, on_progress: &ShieldProgress) {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != QUARANTINE_DIR)
            .flatten()
        {
            if !entry.file_type().is_file() || is_archive(entry.path()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            files.push(entry.path().to_path_buf());
        }

        self.with_stats(|s| s.standalone_total = files.len());
        for file in files {
            if self.cancel.is_cancelled() {
                return;
            }
            let rel = self.rel(&file);
            self.with_stats(|s| {
                s.standalone_scanned += 1;
                s.current_standalone = Some(rel);
            });
            self.clean_file(&file);
            on_progress(self.stats());
        }
        self.with_stats(|s| s.current_standalone = None);
    }

    /// Snapshot of all file paths under `dir` (quarantine excluded).
    fn snapshot_tree(&self, dir: &Path) -> HashSet<PathBuf> {
        WalkDir::new(dir)
            .into_iter()
            .filter_entry(|e| e.file_name() != QUARANTINE_DIR)
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    /// Files that appeared under `dir` since `before`: keep-extension
    /// payloads become extracted paths, new archives become nested work.
    fn diff_tree(
        &self,
        dir: &Path,
        before: &HashSet<PathBuf>,
        exclude: &Path,
    ) -> (Vec<String>, Vec<PathBuf>) {
        let mut extracted = Vec::new();
        let mut nested = Vec::new();
        for path in self.snapshot_tree(dir) {
            if before.contains(&path) || path == exclude {
                continue;
            }
            if is_archive(&path) {
                nested.push(path);
            } else if path
                .file_name()
                .and_then(|f| f.to_str())
                .is_some_and(patterns::is_keep_ext)
            {
                extracted.push(self.rel(&path));
            }
        }
        (extracted, nested)
    }

    fn rel(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}
