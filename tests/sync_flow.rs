#![cfg(unix)]

mod common;

use boardsync::config::PortalConfig;
use boardsync::session::{PhaseStatus, SyncSessionState};
use boardsync::sync::{Orchestrator, ProgressSink, SyncPhase, SyncProgress};
use std::path::Path;
use std::sync::{Arc, Mutex};

fn quiet_sink() -> (Arc<ProgressSink>, Arc<Mutex<Vec<SyncProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let sink: Arc<ProgressSink> = Arc::new(move |p| s.lock().unwrap().push(p));
    (sink, seen)
}

fn base_config(local: &Path, rclone: &Path) -> PortalConfig {
    let mut config = PortalConfig::for_dir(local.to_path_buf());
    config.rclone_binary = rclone.display().to_string();
    config
}

#[tokio::test]
async fn full_run_pulls_cleans_and_uploads() {
    let tools = tempfile::TempDir::new().unwrap();
    let rclone = common::mock_rclone(tools.path());

    let source = tempfile::TempDir::new().unwrap();
    let local = tempfile::TempDir::new().unwrap();
    let backup = tempfile::TempDir::new().unwrap();

    std::fs::create_dir_all(source.path().join("boards")).unwrap();
    std::fs::write(source.path().join("boards/a.tvw"), b"boardview").unwrap();
    std::fs::write(source.path().join("crack.exe"), b"malicious").unwrap();
    std::fs::write(
        source.path().join("manifest.txt"),
        "# Generated: 2026-08-01T00:00:00Z\nboards/a.tvw\ncrack.exe\n",
    )
    .unwrap();

    let config_file = tools.path().join("portal.toml");
    let mut config = base_config(local.path(), &rclone);
    config.source_remote = Some(source.path().display().to_string());
    config.backup_remote = Some(backup.path().display().to_string());
    config.backup_dir = String::new();
    config.upsync_enabled = true;
    config.save(&config_file).unwrap();

    let orch = Orchestrator::new(config, Some(config_file.clone()));
    let (sink, seen) = quiet_sink();
    let summary = orch.run(sink).await.unwrap();

    // Pull: both manifest entries arrived
    assert_eq!(summary.files_pulled, 2);
    assert!(local.path().join("boards/a.tvw").exists());

    // Shield: the malicious file never survives locally or remotely
    assert!(!local.path().join("crack.exe").exists());
    assert!(!backup.path().join("crack.exe").exists());
    assert_eq!(summary.shield.standalone_flagged, 1);

    // Cloud: approved file and the manifest made it to the backup
    assert_eq!(summary.files_uploaded, 1);
    assert_eq!(
        std::fs::read(backup.path().join("boards/a.tvw")).unwrap(),
        b"boardview"
    );
    let remote_manifest =
        std::fs::read_to_string(backup.path().join("upsync-manifest.txt")).unwrap();
    assert!(remote_manifest.contains("boards/a.tvw"));
    assert!(!remote_manifest.contains("crack.exe"));

    // Exclusion ledger remembers the offender
    let offenders =
        std::fs::read_to_string(local.path().join(".shield_offenders.json")).unwrap();
    assert!(offenders.contains("crack.exe"));

    // Session cleared, terminal progress is Done, stats written back
    assert!(SyncSessionState::load(local.path()).is_none());
    let last = seen.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.phase, SyncPhase::Done);
    assert_eq!(last.percentage, 100);
    let persisted = PortalConfig::from_file(&config_file).unwrap();
    assert!(persisted.last_sync_stats.is_some());
    assert!(persisted.last_shield_stats.is_some());
}

#[tokio::test]
async fn second_run_skips_ledgered_offenders() {
    let tools = tempfile::TempDir::new().unwrap();
    let rclone = common::mock_rclone(tools.path());

    let source = tempfile::TempDir::new().unwrap();
    let local = tempfile::TempDir::new().unwrap();
    std::fs::write(source.path().join("lpk.dll"), b"hijack").unwrap();
    std::fs::write(source.path().join("manifest.txt"), "lpk.dll\n").unwrap();

    let mut config = base_config(local.path(), &rclone);
    config.source_remote = Some(source.path().display().to_string());

    let orch = Orchestrator::new(config.clone(), None);
    let (sink, _) = quiet_sink();
    orch.run(sink).await.unwrap();
    assert!(!local.path().join("lpk.dll").exists());

    // The offender is excluded from the second pull entirely
    let orch = Orchestrator::new(config, None);
    let (sink, _) = quiet_sink();
    let summary = orch.run(sink).await.unwrap();
    assert_eq!(summary.files_pulled, 0);
    assert!(!local.path().join("lpk.dll").exists());
}

#[tokio::test]
async fn resumed_upload_skips_files_already_sent() {
    let tools = tempfile::TempDir::new().unwrap();
    let rclone = common::mock_rclone(tools.path());

    let local = tempfile::TempDir::new().unwrap();
    let backup = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(local.path().join("boards")).unwrap();
    std::fs::write(local.path().join("boards/a.tvw"), b"first").unwrap();
    std::fs::write(local.path().join("boards/b.tvw"), b"second").unwrap();
    boardsync::manifest::update_upsync_manifest(
        local.path(),
        boardsync::config::DisposalPolicy::Purge,
    )
    .unwrap();

    // An interrupted session already uploaded a.tvw
    let mut session = SyncSessionState::new("resume-1");
    session.pull = PhaseStatus::Skipped;
    session.clean = PhaseStatus::Skipped;
    session.cloud = PhaseStatus::Running;
    session.uploaded.push("boards/a.tvw".to_string());
    session.save(local.path()).unwrap();

    let mut config = base_config(local.path(), &rclone);
    config.backup_remote = Some(backup.path().display().to_string());
    config.upsync_enabled = true;
    config.enable_shield = false;

    let orch = Orchestrator::new(config, None);
    let (sink, _) = quiet_sink();
    let summary = orch.run(sink).await.unwrap();

    // Only the file the previous run never sent goes over the wire
    assert_eq!(summary.files_uploaded, 1);
    assert!(backup.path().join("boards/b.tvw").exists());
    assert!(!backup.path().join("boards/a.tvw").exists());
    assert!(SyncSessionState::load(local.path()).is_none());
}

#[tokio::test]
async fn upload_only_run_uses_the_manifest() {
    let tools = tempfile::TempDir::new().unwrap();
    let rclone = common::mock_rclone(tools.path());

    let local = tempfile::TempDir::new().unwrap();
    let backup = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(local.path().join("boards")).unwrap();
    std::fs::write(local.path().join("boards/a.tvw"), b"boardview").unwrap();
    boardsync::manifest::update_upsync_manifest(
        local.path(),
        boardsync::config::DisposalPolicy::Purge,
    )
    .unwrap();

    let mut config = base_config(local.path(), &rclone);
    config.backup_remote = Some(backup.path().display().to_string());
    config.upsync_enabled = true;
    config.enable_shield = false;

    let orch = Orchestrator::new(config, None);
    let (sink, _) = quiet_sink();
    let summary = orch.run(sink).await.unwrap();

    assert_eq!(summary.files_pulled, 0);
    assert_eq!(summary.files_uploaded, 1);
    assert!(backup.path().join("boards/a.tvw").exists());
    assert!(backup.path().join("upsync-manifest.txt").exists());
}
