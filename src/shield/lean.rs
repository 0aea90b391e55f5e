//! Lean-mode pre-filter: rejects whole categories of low-value content by
//! path segment before any byte is downloaded.
//!
//! This is independent of the shield's extension whitelist pass. The filter
//! gates downloads by directory segment; the whitelist gates kept bytes
//! after download. Both layers are deliberately preserved.

use super::patterns::{
    has_valuable_indicator, LEAN_EXCLUDE_SEGMENTS, LEAN_INSTALLER_FILENAMES,
};

/// Decide whether a relative path should be downloaded at all in lean mode.
///
/// Every directory segment (not the filename) is checked against the
/// exclusion keywords, both by exact match and by keyword-with-word-boundary.
/// Explicit installer filenames are rejected; valuable indicators on the
/// filename force-keep. Ambiguity resolves toward keeping the file.
pub fn should_download(rel_path: &str) -> bool {
    let segments: Vec<&str> = rel_path.split(['/', '\\']).collect();
    let (filename, dirs) = match segments.split_last() {
        Some((f, d)) => (*f, d),
        None => return true,
    };

    let filename_lower = filename.to_lowercase();
    if LEAN_INSTALLER_FILENAMES.contains(&filename_lower.as_str()) {
        return false;
    }

    if has_valuable_indicator(filename) {
        return true;
    }

    for segment in dirs {
        let seg_lower = segment.to_lowercase();
        for keyword in LEAN_EXCLUDE_SEGMENTS {
            if seg_lower == *keyword || contains_word(&seg_lower, keyword) {
                return false;
            }
        }
    }

    true
}

/// Keyword match with word boundaries: the keyword must be delimited on both
/// sides by segment start/end, whitespace, a digit, or a separator character.
/// This keeps "bios v2" out while letting "symbiosis" through.
fn contains_word(segment: &str, keyword: &str) -> bool {
    let bytes = segment.as_bytes();
    let mut start = 0;
    while let Some(idx) = segment[start..].find(keyword) {
        let begin = start + idx;
        let end = begin + keyword.len();
        if is_boundary(bytes, begin, true) && is_boundary(bytes, end, false) {
            return true;
        }
        start = begin + 1;
        if start >= segment.len() {
            break;
        }
    }
    false
}

fn is_boundary(bytes: &[u8], pos: usize, before: bool) -> bool {
    let neighbor = if before {
        if pos == 0 {
            return true;
        }
        bytes[pos - 1]
    } else {
        if pos >= bytes.len() {
            return true;
        }
        bytes[pos]
    };
    neighbor.is_ascii_whitespace()
        || neighbor.is_ascii_digit()
        || matches!(neighbor, b'-' | b'_' | b'.' | b'(' | b')' | b'[' | b']')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_segment_rejected() {
        assert!(!should_download("bios/flashtool.zip"));
        assert!(!should_download("Asus/Firmware/image.rom"));
        assert!(!should_download("boards/Drivers/pack.7z"));
    }

    #[test]
    fn test_keyword_with_boundary_rejected() {
        assert!(!should_download("bios v2/whatever.zip"));
        assert!(!should_download("X99 (bios)/dump.zip"));
        assert!(!should_download("update_2021/tool.zip"));
    }

    #[test]
    fn test_filename_never_segment_checked() {
        // "bios" appears only in the filename, so the segment filter
        // must not reject it
        assert!(should_download("schematics/BIOS_Schematic.pdf"));
    }

    #[test]
    fn test_embedded_keyword_without_boundary_kept() {
        assert!(should_download("symbiosis/board.tvw"));
        // "softwareless" contains "software" without a right boundary
        assert!(should_download("softwareless/board.brd"));
    }

    #[test]
    fn test_installer_filenames_rejected() {
        assert!(!should_download("pack/setup.exe"));
        assert!(!should_download("Setup.EXE"));
    }

    #[test]
    fn test_valuable_indicator_forces_keep() {
        assert!(should_download("misc/GV-R580 Boardview.zip"));
        assert!(should_download("random/schematic pack.rar"));
    }

    #[test]
    fn test_ambiguous_defaults_to_keep() {
        assert!(should_download("misc/unknown-archive.zip"));
    }
}
