#![cfg(unix)]

mod common;

use boardsync::transfer::progress::Direction;
use boardsync::transfer::{TransferEvent, TransferExecutor};
use boardsync::SyncError;
use tokio::sync::mpsc;

#[tokio::test]
async fn executor_streams_ticks_and_completions() {
    let tools = tempfile::TempDir::new().unwrap();
    let bin = common::write_script(
        tools.path(),
        "chatty-rclone",
        r#"#!/bin/sh
echo '{"level":"info","msg":"Copied (new)","object":"boards/a.tvw"}' >&2
echo '{"level":"info","msg":"stats","stats":{"bytes":512,"totalBytes":1024,"speed":256,"eta":2,"transferring":[{"name":"boards/b.tvw","percentage":50,"speed":256,"eta":2,"bytes":512,"size":1024}]}}' >&2
exit 0
"#,
    );

    let exec = TransferExecutor::new(bin.to_str().unwrap(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    exec.run(&["copy".to_string()], Direction::Download, Some(&tx))
        .await
        .unwrap();
    drop(tx);

    let mut completions = Vec::new();
    let mut ticks = 0;
    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::FileCompleted { path, .. } => completions.push(path),
            TransferEvent::Tick { tick, .. } => {
                ticks += 1;
                assert_eq!(tick.percentage, 50);
            }
        }
    }
    assert_eq!(completions, vec!["boards/a.tvw"]);
    assert_eq!(ticks, 1);
    assert!(exec
        .completed(Direction::Download)
        .contains("boards/a.tvw"));
}

#[tokio::test]
async fn executor_maps_nonzero_exit_to_transfer_error() {
    let tools = tempfile::TempDir::new().unwrap();
    let bin = common::write_script(tools.path(), "failing-rclone", "#!/bin/sh\nexit 3\n");

    let exec = TransferExecutor::new(bin.to_str().unwrap(), None);
    let err = exec
        .run(&["copy".to_string()], Direction::Download, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transfer(_)));
}

#[tokio::test]
async fn executor_surfaces_ansi_decorated_lines() {
    let tools = tempfile::TempDir::new().unwrap();
    let bin = common::write_script(
        tools.path(),
        "ansi-rclone",
        r#"#!/bin/sh
printf '\033[2K{"level":"info","msg":"Copied (new)","object":"x.pdf"}\n' >&2
exit 0
"#,
    );

    let exec = TransferExecutor::new(bin.to_str().unwrap(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    exec.run(&["copy".to_string()], Direction::Download, Some(&tx))
        .await
        .unwrap();
    drop(tx);

    let mut saw = false;
    while let Some(event) = rx.recv().await {
        if let TransferEvent::FileCompleted { path, .. } = event {
            assert_eq!(path, "x.pdf");
            saw = true;
        }
    }
    assert!(saw);
}
