//! Logging initialization. Replaces the teacher's hand-rolled file logger
//! with `tracing`/`tracing-subscriber`, the convention used throughout the
//! rest of the example pack.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber. Honors `RUST_LOG`, defaulting to
/// `info` for this crate and `warn` for dependencies.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,analysis_orchestrator=debug"));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global tracing subscriber already set");
    }
}
