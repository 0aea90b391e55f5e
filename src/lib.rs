//! Boardsync Library
//!
//! Sync portal core: pulls a boardview/schematic library from an rclone
//! source remote, runs a pattern-based malware shield over everything that
//! arrives, and streams cleared files to a backup remote.

pub mod config;
pub mod manifest;
pub mod session;
pub mod shield;
pub mod sync;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::PortalConfig;
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
