//! Exclusion ledger: the persistent record of confirmed-bad relative paths.
//!
//! Offenders are stored as a JSON array next to the library root and
//! mirrored into a plain-text exclusion file consumed by future pull
//! operations, so a flagged filename is never re-downloaded. Writes are
//! full-file rewrites; callers serialize access per local directory.

use crate::utils::errors::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Quarantine directory for isolated content, always excluded from pulls
/// and manifests.
pub const QUARANTINE_DIR: &str = "_risk_tools";

const OFFENDER_FILE: &str = ".shield_offenders.json";
const EXCLUDE_FILE: &str = ".shield_exclude.txt";

/// Persistent, append-only (deduplicated) list of confirmed-bad paths.
#[derive(Debug, Clone)]
pub struct ExclusionLedger {
    dir: PathBuf,
}

impl ExclusionLedger {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn offender_path(&self) -> PathBuf {
        self.dir.join(OFFENDER_FILE)
    }

    pub fn exclude_file_path(&self) -> PathBuf {
        self.dir.join(EXCLUDE_FILE)
    }

    /// Load the current offender list. Starts empty: only paths actually
    /// processed by the shield are recorded.
    pub fn offenders(&self) -> Vec<String> {
        let path = self.offender_path();
        if !path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|data| Ok(serde_json::from_str::<Vec<String>>(&data)?))
        {
            Ok(list) => list,
            Err(e) => {
                error!("Failed to load offender list: {}", e);
                Vec::new()
            }
        }
    }

    /// Offenders as a set, for fast partition lookups.
    pub fn offender_set(&self) -> HashSet<String> {
        self.offenders().into_iter().collect()
    }

    /// Append a confirmed-bad relative path. Deduplicates, persists, and
    /// immediately regenerates the exclusion file.
    pub fn add(&self, rel_path: &str) -> Result<()> {
        let mut offenders = self.offenders();
        if offenders.iter().any(|o| o == rel_path) {
            return Ok(());
        }
        info!("Shield: new offender recorded: {}", rel_path);
        offenders.push(rel_path.to_string());
        self.save(&offenders)?;
        self.regenerate_exclude_file()?;
        Ok(())
    }

    fn save(&self, offenders: &[String]) -> Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        let data = serde_json::to_string_pretty(offenders)?;
        std::fs::write(self.offender_path(), data)?;
        Ok(())
    }

    /// Rewrite the plain-text exclusion file: one pattern per line, current
    /// offenders plus the quarantine wildcard.
    pub fn regenerate_exclude_file(&self) -> Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        let mut entries = self.offenders();
        entries.push(format!("{}/**", QUARANTINE_DIR));
        std::fs::write(self.exclude_file_path(), entries.join("\n") + "\n")?;
        Ok(())
    }

    /// Explicit reset: drop all recorded offenders and rebuild the
    /// exclusion file down to the quarantine wildcard.
    pub fn reset(&self) -> Result<()> {
        let offender_path = self.offender_path();
        if offender_path.exists() {
            std::fs::remove_file(&offender_path)?;
        }
        self.regenerate_exclude_file()?;
        info!("Shield: exclusion history cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_starts_empty() {
        let temp = TempDir::new().unwrap();
        let ledger = ExclusionLedger::new(temp.path());
        assert!(ledger.offenders().is_empty());
    }

    #[test]
    fn test_add_dedup_and_exclude_file() {
        let temp = TempDir::new().unwrap();
        let ledger = ExclusionLedger::new(temp.path());

        ledger.add("bad/malware.zip").unwrap();
        ledger.add("bad/malware.zip").unwrap();
        ledger.add("other.rar").unwrap();

        assert_eq!(ledger.offenders(), vec!["bad/malware.zip", "other.rar"]);

        let exclude = std::fs::read_to_string(ledger.exclude_file_path()).unwrap();
        assert!(exclude.contains("bad/malware.zip"));
        assert!(exclude.contains("other.rar"));
        assert!(exclude.contains("_risk_tools/**"));
        assert!(exclude.ends_with('\n'));
    }

    #[test]
    fn test_reset_clears_history() {
        let temp = TempDir::new().unwrap();
        let ledger = ExclusionLedger::new(temp.path());
        ledger.add("gone.zip").unwrap();
        ledger.reset().unwrap();

        assert!(ledger.offenders().is_empty());
        let exclude = std::fs::read_to_string(ledger.exclude_file_path()).unwrap();
        assert!(!exclude.contains("gone.zip"));
        assert!(exclude.contains("_risk_tools/**"));
    }

    #[test]
    fn test_corrupt_ledger_degrades_to_empty() {
        let temp = TempDir::new().unwrap();
        let ledger = ExclusionLedger::new(temp.path());
        std::fs::write(ledger.offender_path(), "{not json").unwrap();
        assert!(ledger.offenders().is_empty());
    }
}
