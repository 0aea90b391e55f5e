//! Manifest handling: the text inventory of cleaned library content.
//!
//! A manifest is a newline-separated list of relative paths with a small
//! comment header. The source side publishes `manifest.txt`; this agent
//! maintains its own `upsync-manifest.txt` reflecting what actually
//! survived the shield, and uses the two to compute pull work.

use crate::config::DisposalPolicy;
use crate::shield::ledger::{ExclusionLedger, QUARANTINE_DIR};
use crate::shield::{lean, patterns};
use crate::utils::errors::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

/// Filename of the manifest published by the source remote.
pub const SOURCE_MANIFEST: &str = "manifest.txt";
/// Filename of the agent's own post-shield manifest.
pub const UPSYNC_MANIFEST: &str = "upsync-manifest.txt";

/// A parsed manifest: header metadata plus a sorted, deduplicated file list.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub generated_at: Option<String>,
    pub version: Option<String>,
    pub policy: Option<String>,
    pub files: Vec<String>,
}

/// Difference between a remote manifest and local reality.
#[derive(Debug, Clone)]
pub struct ManifestDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub total_count: usize,
}

/// Missing files split by download priority.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Known-flagged names, pulled first so the shield sees them early.
    pub risky: Vec<String>,
    pub standard: Vec<String>,
}

impl Manifest {
    /// Parse manifest text. Comment lines (`#`) carry optional metadata;
    /// everything else is a relative path. Output is sorted and unique.
    pub fn parse(text: &str) -> Self {
        let mut manifest = Manifest::default();
        let mut seen = HashSet::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                let comment = comment.trim();
                if let Some(v) = comment.strip_prefix("Generated:") {
                    manifest.generated_at = Some(v.trim().to_string());
                } else if let Some(v) = comment.strip_prefix("Shield version:") {
                    manifest.version = Some(v.trim().to_string());
                } else if let Some(v) = comment.strip_prefix("Policy:") {
                    manifest.policy = Some(v.trim().to_string());
                }
                continue;
            }
            if seen.insert(line.to_string()) {
                manifest.files.push(line.to_string());
            }
        }
        manifest.files.sort();
        manifest
    }

    /// Render back to text with a fresh header.
    pub fn stringify(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# Generated: {}\n",
            self.generated_at
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        ));
        out.push_str(&format!(
            "# Shield version: {}\n",
            self.version
                .as_deref()
                .unwrap_or(patterns::CATALOG_VERSION)
        ));
        if let Some(policy) = &self.policy {
            out.push_str(&format!("# Policy: {}\n", policy));
        }
        out.push_str(&format!("# Files: {}\n", self.files.len()));
        let mut files = self.files.clone();
        files.sort();
        for file in files {
            out.push_str(&file);
            out.push('\n');
        }
        out
    }

    /// What the remote has that we don't, and vice versa.
    pub fn diff(&self, local: &HashSet<String>) -> ManifestDiff {
        let remote: HashSet<&String> = self.files.iter().collect();
        let added = self
            .files
            .iter()
            .filter(|f| !local.contains(*f))
            .cloned()
            .collect();
        let removed = local
            .iter()
            .filter(|f| !remote.contains(*f))
            .cloned()
            .collect();
        ManifestDiff {
            added,
            removed,
            total_count: self.files.len(),
        }
    }
}

/// Every regular file under `root`, as forward-slash relative paths.
/// Quarantine and dotfiles (state, ledger, manifests) are excluded.
pub fn local_files(root: &Path) -> HashSet<String> {
    let mut files = HashSet::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != QUARANTINE_DIR)
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || name == SOURCE_MANIFEST || name == UPSYNC_MANIFEST {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.insert(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files
}

/// Manifest entries not present locally and not in the exclusion set.
pub fn missing_files(
    manifest: &Manifest,
    local: &HashSet<String>,
    excluded: &HashSet<String>,
) -> Vec<String> {
    manifest
        .files
        .iter()
        .filter(|f| !local.contains(*f) && !excluded.contains(*f))
        .cloned()
        .collect()
}

/// Split missing files into the risky-first stage and the bulk stage.
/// Full mode flags exact risky names and garbage substrings anywhere in
/// the path; lean mode uses the priority list instead.
pub fn partition(missing: Vec<String>, lean_mode: bool) -> Partition {
    let mut partition = Partition::default();
    for path in missing {
        let filename = path.rsplit('/').next().unwrap_or(&path);
        let risky = if lean_mode {
            patterns::is_lean_priority_filename(filename)
        } else {
            patterns::is_risky_filename(filename) || patterns::matches_garbage(&path)
        };
        if risky {
            partition.risky.push(path);
        } else {
            partition.standard.push(path);
        }
    }
    partition
}

/// Apply the lean pre-filter to a list of candidate paths.
pub fn lean_filter(paths: Vec<String>) -> Vec<String> {
    paths
        .into_iter()
        .filter(|p| lean::should_download(p))
        .collect()
}

/// Regenerate the upsync manifest from the current local tree and persist
/// it. Ledgered offenders never enter the manifest, even if their bytes
/// are still on disk because a disposal failed. Returns the manifest
/// written.
pub fn update_upsync_manifest(root: &Path, policy: DisposalPolicy) -> Result<Manifest> {
    let offenders = ExclusionLedger::new(root).offender_set();
    let mut files: Vec<String> = local_files(root)
        .into_iter()
        .filter(|f| !offenders.contains(f))
        .collect();
    files.sort();
    let manifest = Manifest {
        generated_at: Some(Utc::now().to_rfc3339()),
        version: Some(patterns::CATALOG_VERSION.to_string()),
        policy: Some(policy.to_string()),
        files,
    };
    std::fs::write(root.join(UPSYNC_MANIFEST), manifest.stringify())?;
    Ok(manifest)
}

/// Verification report: how much of the upsync manifest exists on disk.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub total: usize,
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn valid(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Check every upsync-manifest entry against the local tree.
pub fn verify(root: &Path) -> Result<VerifyReport> {
    let text = std::fs::read_to_string(root.join(UPSYNC_MANIFEST))?;
    let manifest = Manifest::parse(&text);
    let local = local_files(root);
    let missing: Vec<String> = manifest
        .files
        .iter()
        .filter(|f| !local.contains(*f))
        .cloned()
        .collect();
    info!(
        "Manifest verify: {} entries, {} missing",
        manifest.files.len(),
        missing.len()
    );
    Ok(VerifyReport {
        total: manifest.files.len(),
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_and_files() {
        let text = "# Generated: 2026-01-01T00:00:00Z\n\
                    # Shield version: 1.0.0\n\
                    # Policy: purge\n\
                    # Files: 2\n\
                    b/board.tvw\n\
                    a/schematic.pdf\n\
                    b/board.tvw\n";
        let m = Manifest::parse(text);
        assert_eq!(m.generated_at.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(m.version.as_deref(), Some("1.0.0"));
        assert_eq!(m.policy.as_deref(), Some("purge"));
        // sorted, deduplicated
        assert_eq!(m.files, vec!["a/schematic.pdf", "b/board.tvw"]);
    }

    #[test]
    fn test_stringify_roundtrip() {
        let m = Manifest {
            generated_at: Some("2026-01-01T00:00:00Z".to_string()),
            version: Some("1.0.0".to_string()),
            policy: Some("isolate".to_string()),
            files: vec!["z.tvw".to_string(), "a.pdf".to_string()],
        };
        let text = m.stringify();
        let parsed = Manifest::parse(&text);
        assert_eq!(parsed.files, vec!["a.pdf", "z.tvw"]);
        assert_eq!(parsed.policy.as_deref(), Some("isolate"));
    }

    #[test]
    fn test_diff() {
        let m = Manifest::parse("a.bin\nb.bin\nc.bin\n");
        let local: HashSet<String> = ["a.bin", "stale.bin"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let diff = m.diff(&local);
        assert_eq!(diff.added, vec!["b.bin", "c.bin"]);
        assert_eq!(diff.removed, vec!["stale.bin"]);
        assert_eq!(diff.total_count, 3);
    }

    #[test]
    fn test_missing_excludes_local_and_ledgered() {
        let m = Manifest::parse("a.bin\nb.bin\nc.bin\n");
        let local: HashSet<String> = ["a.bin"].iter().map(|s| s.to_string()).collect();
        let excluded: HashSet<String> = ["b.bin"].iter().map(|s| s.to_string()).collect();
        assert_eq!(missing_files(&m, &local, &excluded), vec!["c.bin"]);
    }

    #[test]
    fn test_partition_risky_first() {
        let missing = vec![
            "gpu/GV-R580AORUS-8GD-1.0-1.01 Boardview.zip".to_string(),
            "tools/factory-chinafix pack.zip".to_string(),
            "misc/plain.zip".to_string(),
        ];
        let p = partition(missing, false);
        assert_eq!(p.risky.len(), 2);
        assert_eq!(p.standard, vec!["misc/plain.zip"]);
    }

    #[test]
    fn test_local_files_skips_metadata() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();
        std::fs::create_dir_all(temp.path().join(QUARANTINE_DIR)).unwrap();
        std::fs::write(temp.path().join("sub/board.tvw"), b"x").unwrap();
        std::fs::write(temp.path().join(".shield_offenders.json"), b"[]").unwrap();
        std::fs::write(temp.path().join(UPSYNC_MANIFEST), b"#").unwrap();
        std::fs::write(temp.path().join(QUARANTINE_DIR).join("bad.zip"), b"x").unwrap();

        let files = local_files(temp.path());
        assert_eq!(files.len(), 1);
        assert!(files.contains("sub/board.tvw"));
    }

    #[test]
    fn test_update_excludes_ledgered_offenders() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("board.tvw"), b"x").unwrap();
        // Offender still on disk, e.g. after a failed disposal
        std::fs::write(temp.path().join("bad.zip"), b"x").unwrap();
        ExclusionLedger::new(temp.path()).add("bad.zip").unwrap();

        let m = update_upsync_manifest(temp.path(), DisposalPolicy::Purge).unwrap();
        assert_eq!(m.files, vec!["board.tvw"]);
    }

    #[test]
    fn test_update_and_verify() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("board.tvw"), b"x").unwrap();
        let m = update_upsync_manifest(temp.path(), DisposalPolicy::Purge).unwrap();
        assert_eq!(m.files, vec!["board.tvw"]);

        let report = verify(temp.path()).unwrap();
        assert!(report.valid());

        std::fs::remove_file(temp.path().join("board.tvw")).unwrap();
        let report = verify(temp.path()).unwrap();
        assert_eq!(report.missing, vec!["board.tvw"]);
    }
}
