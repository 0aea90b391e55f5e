//! Progress model for rclone transfers, fed by its JSON log stream.
//!
//! Each executor direction keeps one `ProgressTable`: per-file rows from
//! `stats.transferring`, plus a grow-only set of completed paths driven by
//! the `Copied`/`Moved` log messages. Completion fires the callback exactly
//! once per path per session.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Which way bytes are flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

/// State of one in-flight file.
#[derive(Debug, Clone, Serialize)]
pub struct FileTransfer {
    pub name: String,
    pub percentage: u8,
    pub speed: f64,
    pub eta_secs: Option<u64>,
    pub bytes: u64,
    pub size: u64,
}

/// Aggregate snapshot emitted on every stats line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferTick {
    pub bytes: u64,
    pub total_bytes: u64,
    pub speed: f64,
    pub eta_secs: Option<u64>,
    pub percentage: u8,
    pub transferring: Vec<FileTransfer>,
    pub completed_count: usize,
}

/// Per-direction progress state.
#[derive(Debug, Default)]
pub struct ProgressTable {
    transfers: HashMap<String, FileTransfer>,
    /// Paths seen completing this session. Grow-only: resumed runs must not
    /// re-announce files finished earlier.
    completions: HashSet<String>,
}

impl ProgressTable {
    /// Digest one rclone JSON log line. Returns a tick when the line carried
    /// a stats block, and invokes `on_file_complete` for each newly finished
    /// path.
    pub fn apply_json(
        &mut self,
        value: &serde_json::Value,
        on_file_complete: &mut dyn FnMut(&str),
    ) -> Option<TransferTick> {
        // Completion messages: "Copied (new)", "Copied (replaced existing)",
        // "Moved (new)" with the path in "object".
        if let (Some(msg), Some(object)) = (
            value.get("msg").and_then(|m| m.as_str()),
            value.get("object").and_then(|o| o.as_str()),
        ) {
            if msg.starts_with("Copied") || msg.starts_with("Moved") {
                let path = object.to_string();
                self.transfers.remove(&path);
                if self.completions.insert(path.clone()) {
                    on_file_complete(&path);
                }
            }
        }

        let stats = value.get("stats")?;
        let bytes = stats.get("bytes").and_then(|v| v.as_u64()).unwrap_or(0);
        let total_bytes = stats
            .get("totalBytes")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let speed = stats.get("speed").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let eta_secs = stats.get("eta").and_then(|v| v.as_u64());

        self.transfers.clear();
        if let Some(items) = stats.get("transferring").and_then(|t| t.as_array()) {
            for item in items {
                let name = match item.get("name").and_then(|n| n.as_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let entry = FileTransfer {
                    name: name.clone(),
                    percentage: item
                        .get("percentage")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0)
                        .min(100) as u8,
                    speed: item.get("speed").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    eta_secs: item.get("eta").and_then(|v| v.as_u64()),
                    bytes: item.get("bytes").and_then(|v| v.as_u64()).unwrap_or(0),
                    size: item.get("size").and_then(|v| v.as_u64()).unwrap_or(0),
                };
                self.transfers.insert(name, entry);
            }
        }

        let percentage = if total_bytes > 0 {
            ((bytes as f64 / total_bytes as f64) * 100.0).min(100.0) as u8
        } else {
            0
        };

        Some(TransferTick {
            bytes,
            total_bytes,
            speed,
            eta_secs,
            percentage,
            transferring: {
                let mut rows: Vec<FileTransfer> = self.transfers.values().cloned().collect();
                rows.sort_by(|a, b| a.name.cmp(&b.name));
                rows
            },
            completed_count: self.completions.len(),
        })
    }

    pub fn completed(&self) -> &HashSet<String> {
        &self.completions
    }

    /// Drop in-flight rows but keep session completions.
    pub fn reset_transfers(&mut self) {
        self.transfers.clear();
    }
}

/// Strip ANSI escape sequences; rclone decorates some lines even in JSON
/// log mode when a terminal is misdetected.
pub fn strip_ansi(line: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("static pattern")
    });
    re.replace_all(line, "").into_owned()
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}

pub fn format_eta(eta_secs: Option<u64>) -> String {
    match eta_secs {
        None => "-".to_string(),
        Some(s) if s >= 3600 => format!("{}h{}m", s / 3600, (s % 3600) / 60),
        Some(s) if s >= 60 => format!("{}m{}s", s / 60, s % 60),
        Some(s) => format!("{}s", s),
    }
}
