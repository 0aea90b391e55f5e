//! Configuration management for the sync portal.
//!
//! Loads configuration from a TOML file with per-field defaults, and writes
//! back summary statistics after a successful run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// How the shield disposes of flagged content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisposalPolicy {
    /// Delete flagged archives/files outright.
    #[default]
    Purge,
    /// Move flagged content into the quarantine directory.
    Isolate,
    /// Trust the source: extract everything in place, no quarantine.
    Extract,
}

impl fmt::Display for DisposalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposalPolicy::Purge => write!(f, "purge"),
            DisposalPolicy::Isolate => write!(f, "isolate"),
            DisposalPolicy::Extract => write!(f, "extract"),
        }
    }
}

impl DisposalPolicy {
    /// Parse a policy name, defaulting to purge for anything unrecognized.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => DisposalPolicy::Isolate,
            "extract" => DisposalPolicy::Extract,
            _ => DisposalPolicy::Purge,
        }
    }
}

/// Download filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Download everything the manifest lists.
    #[default]
    Full,
    /// Path-segment bloat filtering before download, strict extension
    /// whitelist after.
    Lean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Local library root
    pub local_dir: PathBuf,

    /// rclone source remote, e.g. "portal-source:/"
    #[serde(default)]
    pub source_remote: Option<String>,

    /// rclone backup remote, e.g. "portal-backup:"
    #[serde(default)]
    pub backup_remote: Option<String>,

    /// Path under the backup remote
    #[serde(default)]
    pub backup_dir: String,

    /// Upload cleared files to the backup remote
    #[serde(default)]
    pub upsync_enabled: bool,

    /// Run the malware shield over downloaded content
    #[serde(default = "default_true")]
    pub enable_shield: bool,

    /// Disposal policy for flagged content
    #[serde(default)]
    pub policy: DisposalPolicy,

    /// Full or lean download mode
    #[serde(default)]
    pub download_mode: DownloadMode,

    /// Use `sync` (mirror deletions) instead of `copy` for the pull
    #[serde(default)]
    pub strict_mirror: bool,

    /// Parallel transfers for the pull phase
    #[serde(default = "default_transfers")]
    pub downsync_transfers: u32,

    /// Parallel transfers for the cloud phase
    #[serde(default = "default_transfers")]
    pub upsync_transfers: u32,

    /// Transfer tool binary (overridable for tests)
    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: String,

    /// Explicit rclone config file path
    #[serde(default)]
    pub rclone_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Summary of the last successful sync, written back on completion
    #[serde(default)]
    pub last_sync_stats: Option<LastSyncStats>,

    /// Summary of the last shield run, written back on completion
    #[serde(default)]
    pub last_shield_stats: Option<LastShieldStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastSyncStats {
    pub timestamp: i64,
    pub files_processed: usize,
    pub bytes_transferred: u64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastShieldStats {
    pub timestamp: i64,
    pub scanned_archives: usize,
    pub garbage_hits: usize,
    pub extracted_files: usize,
}

// Default values
fn default_true() -> bool {
    true
}

fn default_transfers() -> u32 {
    4
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PortalConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PortalConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration back to a TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a configuration with defaults for the given local directory
    pub fn for_dir(local_dir: PathBuf) -> Self {
        PortalConfig {
            local_dir,
            source_remote: None,
            backup_remote: None,
            backup_dir: String::new(),
            upsync_enabled: false,
            enable_shield: true,
            policy: DisposalPolicy::Purge,
            download_mode: DownloadMode::Full,
            strict_mirror: false,
            downsync_transfers: default_transfers(),
            upsync_transfers: default_transfers(),
            rclone_binary: default_rclone_binary(),
            rclone_config: None,
            log_level: default_log_level(),
            last_sync_stats: None,
            last_shield_stats: None,
        }
    }

    /// Pull phase is active when a source remote is configured.
    pub fn pull_enabled(&self) -> bool {
        self.source_remote.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Cloud phase is active when upsync is on and a backup remote exists.
    pub fn cloud_enabled(&self) -> bool {
        self.upsync_enabled && self.backup_remote.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Full rclone destination for the cloud phase.
    pub fn backup_destination(&self) -> Option<String> {
        let remote = self.backup_remote.as_deref()?;
        if remote.is_empty() {
            return None;
        }
        Some(format!("{}{}", remote, self.backup_dir))
    }
}
