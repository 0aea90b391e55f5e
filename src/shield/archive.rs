//! Archive inspector wrapping an external archive CLI.
//!
//! Two interchangeable backends: the 7-Zip family (`7z`/`7za`) and the RAR
//! family (`rar`/`unrar`). Backend selection happens once at startup by
//! probing PATH; when neither is found the shield degrades to
//! standalone-file scanning only.

use crate::utils::errors::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Which tool family the bound engine belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    SevenZip,
    Rar,
}

/// A bound archive engine: tool family plus resolved binary path.
#[derive(Debug, Clone)]
pub struct ArchiveEngine {
    pub kind: EngineKind,
    pub bin: PathBuf,
}

#[cfg(windows)]
const SEVEN_ZIP_BINS: &[&str] = &["7z.exe", "7za.exe"];
#[cfg(windows)]
const RAR_BINS: &[&str] = &["rar.exe", "unrar.exe"];

#[cfg(not(windows))]
const SEVEN_ZIP_BINS: &[&str] = &["7z", "7za"];
#[cfg(not(windows))]
const RAR_BINS: &[&str] = &["rar", "unrar"];

impl ArchiveEngine {
    /// Bind an engine explicitly (tests inject fake binaries this way).
    pub fn new(kind: EngineKind, bin: PathBuf) -> Self {
        Self { kind, bin }
    }

    /// Probe PATH for a usable archive tool, preferring the 7-Zip family.
    pub fn detect() -> Option<Self> {
        if let Some(bin) = find_in_path(SEVEN_ZIP_BINS) {
            debug!("Archive engine: 7z family at {}", bin.display());
            return Some(Self::new(EngineKind::SevenZip, bin));
        }
        if let Some(bin) = find_in_path(RAR_BINS) {
            debug!("Archive engine: rar family at {}", bin.display());
            return Some(Self::new(EngineKind::Rar, bin));
        }
        None
    }

    /// List archive contents without extracting. Returns the raw listing
    /// text; any spawn failure or nonzero exit maps to a listing failure.
    pub fn list(&self, archive: &Path) -> Result<String> {
        let output = match self.kind {
            EngineKind::SevenZip => Command::new(&self.bin)
                .arg("l")
                .arg(archive)
                .arg("-r")
                .output(),
            EngineKind::Rar => Command::new(&self.bin).arg("v").arg(archive).output(),
        };

        let output = output.map_err(|e| SyncError::Listing {
            path: archive.display().to_string(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(SyncError::Listing {
                path: archive.display().to_string(),
                reason: format!("exit status {}", output.status),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Selectively extract members matching `member_glob` into `dest`,
    /// preserving the archive's internal directory structure. Returns
    /// whether the tool reported success; never aborts the sweep.
    pub fn extract(&self, archive: &Path, member_glob: &str, dest: &Path) -> bool {
        let status = match self.kind {
            EngineKind::SevenZip => Command::new(&self.bin)
                .arg("x")
                .arg(archive)
                .arg(member_glob)
                .arg(format!("-o{}", dest.display()))
                .arg("-r")
                .arg("-y")
                .status(),
            EngineKind::Rar => Command::new(&self.bin)
                .arg("x")
                .arg("-r")
                .arg("-y")
                .arg(archive)
                .arg(member_glob)
                .arg(dest)
                .status(),
        };

        match status {
            Ok(s) => s.success(),
            Err(e) => {
                debug!(
                    "Extraction spawn failed for {}: {}",
                    archive.display(),
                    e
                );
                false
            }
        }
    }
}

/// True for the archive formats the shield sweeps.
pub fn is_archive(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("zip") | Some("7z") | Some("rar")
    )
}

fn find_in_path(names: &[&str]) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
