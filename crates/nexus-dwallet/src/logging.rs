use eyre::Context as _;
use tracing_subscriber::prelude::*;

use crate::paths::NexusPaths;

/// Installs JSON logging to stderr and to `paths.log_file`, both filtered by `RUST_LOG`.
///
/// Keep the returned guard alive for the life of the process; dropping it flushes and stops
/// the file writer.
pub fn init_logging(paths: &NexusPaths) -> eyre::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("nexus-dwallet.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))?;

    Ok(guard)
}
