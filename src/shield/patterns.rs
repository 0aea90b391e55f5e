//! Static pattern catalog for the malware shield.
//!
//! These tables are the auditable heuristics the shield matches against.
//! All matching is case-insensitive. Safe patterns are informational only
//! and never exempt an archive from disposal.

/// Catalog revision, written into manifest headers.
pub const CATALOG_VERSION: &str = "1.0.0";

/// Extensions always worth salvaging out of a flagged archive:
/// boardview/schematic formats, firmware images, structured data.
pub const KEEP_EXTS: &[&str] = &[
    ".tvw", ".brd", ".fz", ".cad", ".asc", ".pdf", ".bvr", ".pcb",
    ".sqlite3", ".obdata", ".obdlocal", ".obdlog", ".obdq",
    ".bin", ".rom", ".cap", ".fd", ".wph", ".hex", ".txt", ".json",
];

/// Legitimate flashing-utility indicators. Counted, never decisive.
pub const SAFE_PATTERNS: &[&str] = &[
    "flash", "afud", "insyde", "h2o", "utility", "update", "phlash", "ami",
    "phoenix", "dell", "hp", "lenovo", "bios",
];

/// Substrings that mark an archive listing or filename as malicious:
/// cracked-software markers, hijack DLL names, known distributor signatures.
pub const GARBAGE_PATTERNS: &[&str] = &[
    "lpk.dll",
    "open boardview using this tvw specific software",
    "chinafix",
    "程序_原厂_迅维版主分享",
    "crack.exe",
    "patch.exe",
    "keygen.exe",
    "loader.exe",
    "activator",
    "bypass",
    "medicine",
    "fixed",
    ".exe.bak",
    "dos4gw",
];

/// Known-flagged archive filenames, matched by exact case-insensitive
/// equality. Used to schedule priority downloads before content inspection
/// and to short-circuit listing analysis.
pub const RISKY_FILENAMES: &[&str] = &[
    "GV-R580AORUS-8GD-1.0-1.01 Boardview.zip",
    "GV-R580GAMING-8GD-1.0-1.01 Boardview.zip",
    "GV-RX580GAMING-4GD-1.0-1.01 Boardview.zip",
    "GV-RX580GAMING-8GD-1.0-1.01 Boardview.zip",
    "GV-R939XG1 GAMING-8GD-1.0-1.01 Boardview.zip",
    "GV-R938WF2-4GD-1.0 Boardview.zip",
    "IOT73 V3.0 TG-B75.zip",
    "GV-R938G1 GAMING-4GD-1.02 Boardview.zip",
    "GV-RX470G1 GAMING-4GD-0.2 Boardview.zip",
    "GV-RX480G1 GAMING-4GD-1.1 Boardview.zip",
    "BIOS_K54C usb 3.0_factory-Chinafix.zip",
    "BIOS_K54LY usb 3.0_factory-Chinafix.zip",
    "GV-RX570AORUS-4GD-1.0 Boardview.zip",
    "GV-RX580AORUS-4GD-0.2-1.1 Boardview.zip",
    "GV-RX580GAMING-8GD-1.0 Boardview.zip",
    "GV-RX590GAMING-8GD-1.0 Boardview.zip",
    "BIOS_k53SJ usb 3.0 K53SJFW05300A_factory-Chinafix.zip",
    "BIOS_k53sv usb 3.0 _factory-Chinafix.zip",
    "BIOS_u310 U410_Chinafix.zip",
    "GV-N3070EAGLE OC-8GD-1.0 Boardview.zip",
    "DANL9MB18F0 (tvw).rar",
    "GV-N4090GAMING-OC-24GD r1.0 boardview.zip",
];

/// Lean mode: only these survive the post-download whitelist pass.
pub const LEAN_KEEP_EXTS: &[&str] = &[
    ".pdf", ".txt",
    ".brd", ".pcb", ".tvw", ".fz", ".faz", ".cad", ".bdv", ".bv", ".cst",
    ".gr", ".obdata",
    ".sqlite3", ".obdlocal", ".obdlog", ".obdq",
];

/// Lean mode: explicitly purged even when a pattern says "safe".
pub const LEAN_PURGE_EXTS: &[&str] = &[
    ".bin", ".rom", ".cap", ".fd", ".hex", ".wph",
    ".exe", ".dll", ".sys", ".msi", ".bat", ".cmd", ".vbs", ".js", ".com",
    ".scr", ".inf", ".cat", ".drv",
];

/// Directory-segment keywords that classify a whole path as bloat before
/// download. Matched per segment, never against the filename.
pub const LEAN_EXCLUDE_SEGMENTS: &[&str] = &[
    "bios", "firmware", "drivers", "driver", "utilities", "utility", "tools",
    "software", "update", "updates", "me_region", "ec", "fw",
];

/// Installer filenames rejected outright in lean mode.
pub const LEAN_INSTALLER_FILENAMES: &[&str] = &["setup.exe", "install.exe", "installer.exe"];

/// Filename fragments that indicate an archive likely holds boardviews or
/// schematics. Force-keep in lean mode.
pub const VALUABLE_INDICATORS: &[&str] = &[
    "boardview", "schematic",
    ".tvw", ".brd", ".cad", ".fz", ".asc", ".bvr",
    ".pdf",
    "brd_", "sch_",
];

/// Archives known to be valuable, downloaded first in lean mode.
pub const LEAN_PRIORITY_FILENAMES: &[&str] = &[
    "GV-R580AORUS-8GD-1.0-1.01 Boardview.zip",
    "GV-R580GAMING-8GD-1.0-1.01 Boardview.zip",
    "GV-RX580GAMING-4GD-1.0-1.01 Boardview.zip",
    "GV-RX580GAMING-8GD-1.0-1.01 Boardview.zip",
    "GV-R939XG1 GAMING-8GD-1.0-1.01 Boardview.zip",
    "GV-R938WF2-4GD-1.0 Boardview.zip",
    "IOT73 V3.0 TG-B75.zip",
    "GV-R938G1 GAMING-4GD-1.02 Boardview.zip",
    "GV-RX470G1 GAMING-4GD-0.2 Boardview.zip",
    "GV-RX480G1 GAMING-4GD-1.1 Boardview.zip",
    "GV-RX570AORUS-4GD-1.0 Boardview.zip",
    "GV-RX580AORUS-4GD-0.2-1.1 Boardview.zip",
    "GV-RX580GAMING-8GD-1.0 Boardview.zip",
    "GV-RX590GAMING-8GD-1.0 Boardview.zip",
    "GV-N3070EAGLE OC-8GD-1.0 Boardview.zip",
    "DANL9MB18F0 (tvw).rar",
    "GV-N4090GAMING-OC-24GD r1.0 boardview.zip",
];

/// Extension of `name` (including the dot), lowercased. Empty when none.
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Is the file's extension in the keep list?
pub fn is_keep_ext(name: &str) -> bool {
    let ext = extension_of(name);
    !ext.is_empty() && KEEP_EXTS.contains(&ext.as_str())
}

/// Is the file's extension in the lean-mode strict whitelist?
pub fn is_lean_keep_ext(name: &str) -> bool {
    let ext = extension_of(name);
    !ext.is_empty() && LEAN_KEEP_EXTS.contains(&ext.as_str())
}

/// Does the text contain any garbage pattern? Case-insensitive.
pub fn matches_garbage(text: &str) -> bool {
    let lower = text.to_lowercase();
    GARBAGE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// How many safe-tool indicators appear in the text.
pub fn safe_pattern_hits(text: &str) -> usize {
    let lower = text.to_lowercase();
    SAFE_PATTERNS.iter().filter(|p| lower.contains(*p)).count()
}

/// Exact case-insensitive match against the known-risky filename list.
pub fn is_risky_filename(name: &str) -> bool {
    RISKY_FILENAMES.iter().any(|p| p.eq_ignore_ascii_case(name))
}

/// Exact case-insensitive match against the lean priority list.
pub fn is_lean_priority_filename(name: &str) -> bool {
    LEAN_PRIORITY_FILENAMES
        .iter()
        .any(|p| p.eq_ignore_ascii_case(name))
}

/// Does the filename carry any valuable-content indicator?
pub fn has_valuable_indicator(name: &str) -> bool {
    let lower = name.to_lowercase();
    VALUABLE_INDICATORS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_ext_case_insensitive() {
        assert!(is_keep_ext("board.TVW"));
        assert!(is_keep_ext("notes.pdf"));
        assert!(is_keep_ext("dump.BIN"));
        assert!(!is_keep_ext("crack.exe"));
        assert!(!is_keep_ext("noext"));
    }

    #[test]
    fn test_garbage_matching() {
        assert!(matches_garbage("some/CRACK.EXE inside"));
        assert!(matches_garbage("factory-Chinafix release"));
        assert!(matches_garbage("lpk.dll"));
        assert!(!matches_garbage("GV-R580 schematic.pdf"));
    }

    #[test]
    fn test_risky_filename_exact_match() {
        assert!(is_risky_filename("gv-r580aorus-8gd-1.0-1.01 boardview.zip"));
        assert!(is_risky_filename("DANL9MB18F0 (tvw).rar"));
        // Substring of a risky name is not a match
        assert!(!is_risky_filename("GV-R580AORUS-8GD"));
    }

    #[test]
    fn test_safe_patterns_are_counted_not_decisive() {
        let listing = "AFUDOS flash utility, Insyde H2O update";
        assert!(safe_pattern_hits(listing) >= 3);
        assert!(!matches_garbage(listing));
    }

    #[test]
    fn test_lean_tables() {
        assert!(is_lean_keep_ext("a.tvw"));
        assert!(!is_lean_keep_ext("a.bin")); // excess in lean mode
        assert!(LEAN_PURGE_EXTS.contains(&".bin"));
        assert!(has_valuable_indicator("X99 BoardView archive.zip"));
        assert!(is_lean_priority_filename("iot73 v3.0 tg-b75.zip"));
    }

    #[test]
    fn test_extension_of_dotfile() {
        // A leading dot is a hidden-file marker, not an extension
        assert_eq!(extension_of(".sync_state"), "");
        assert_eq!(extension_of("a.b.ZIP"), ".zip");
    }
}
