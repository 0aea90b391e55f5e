//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging. `level` applies to this crate's targets; dependencies
/// stay at warn unless RUST_LOG overrides the whole filter.
pub fn init(level: &str) -> anyhow::Result<()> {
    let directives = format!("warn,boardsync={}", level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("warn,boardsync=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
