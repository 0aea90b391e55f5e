use anyhow::Context;
use boardsync::config::PortalConfig;
use boardsync::manifest;
use boardsync::shield::ExclusionLedger;
use boardsync::sync::{Orchestrator, ProgressSink, SyncPhase, SyncProgress};
use boardsync::utils::logger;
use boardsync::SyncError;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "boardsync",
    version,
    about = "Sync a boardview/schematic library from a source remote, shield it, and back it up"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local library root (overrides the config file)
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Check the upsync manifest against the local tree and exit
    #[arg(long)]
    verify_manifest: bool,

    /// Clear the shield's exclusion history and exit
    #[arg(long)]
    reset_shield: bool,
}

fn load_config(args: &Args) -> anyhow::Result<(PortalConfig, Option<PathBuf>)> {
    if let Some(path) = &args.config {
        let mut config = PortalConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        if let Some(dir) = &args.local_dir {
            config.local_dir = dir.clone();
        }
        Ok((config, Some(path.clone())))
    } else if let Some(dir) = &args.local_dir {
        Ok((PortalConfig::for_dir(dir.clone()), None))
    } else {
        anyhow::bail!("either --config or --local-dir is required");
    }
}

/// Log progress on phase changes and whole-percent steps only.
fn progress_logger() -> Arc<ProgressSink> {
    let last: Mutex<(SyncPhase, u8)> = Mutex::new((SyncPhase::Idle, 0));
    Arc::new(move |p: SyncProgress| {
        let mut last = last.lock().unwrap();
        if (p.phase, p.percentage) == *last {
            return;
        }
        *last = (p.phase, p.percentage);
        info!("[{:?}] {}% {}", p.phase, p.percentage, p.message);
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, config_path) = load_config(&args)?;
    logger::init(args.log_level.as_deref().unwrap_or(&config.log_level))?;

    if args.reset_shield {
        ExclusionLedger::new(&config.local_dir).reset()?;
        return Ok(());
    }

    if args.verify_manifest {
        let report = manifest::verify(&config.local_dir)
            .context("manifest verification failed")?;
        if report.valid() {
            info!("Manifest valid: all {} entries present", report.total);
            return Ok(());
        }
        for path in &report.missing {
            warn!("Missing: {}", path);
        }
        anyhow::bail!(
            "{} of {} manifest entries missing locally",
            report.missing.len(),
            report.total
        );
    }

    info!(
        "boardsync starting: library at {}",
        config.local_dir.display()
    );

    let orchestrator = Arc::new(Orchestrator::new(config, config_path));
    let interruptee = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping transfers");
            interruptee.stop();
        }
    });

    match orchestrator.run(progress_logger()).await {
        Ok(summary) => {
            info!(
                "Sync complete: {} pulled, {} uploaded, {} archives scanned, {} flagged",
                summary.files_pulled,
                summary.files_uploaded,
                summary.shield.scanned_archives,
                summary.shield.flagged_archives
            );
            Ok(())
        }
        Err(SyncError::Aborted) => {
            info!("Stopped by user; session saved for resume");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
