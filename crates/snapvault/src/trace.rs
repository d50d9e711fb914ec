use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::format, layer::SubscriberExt, util::SubscriberInitExt, Layer};
use utils::config::{file_appender, LogConfig};

/// init tracing subscriber
///
/// The embedding process calls this once at startup and holds the
/// returned guard for the lifetime of the program.
///
/// # Errors
/// Return error if a global subscriber is already set
#[inline]
pub fn init_subscriber(
    name: &str,
    log_config: &LogConfig,
) -> Result<Option<WorkerGuard>, tracing_subscriber::util::TryInitError> {
    let mut guard = None;
    let log_file_layer = log_config.path().as_ref().map(|log_path| {
        let file_appender = file_appender(*log_config.rotation(), log_path, name);
        // `WorkerGuard` should be assigned in the `main` function or whatever the entrypoint of the program is.
        let (non_blocking, guard_inner) = tracing_appender::non_blocking(file_appender);
        guard = Some(guard_inner);
        tracing_subscriber::fmt::layer()
            .event_format(format().compact())
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(*log_config.level())
    });

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_config.level().to_string())),
    );

    tracing_subscriber::registry()
        .with(log_file_layer)
        .with(stdout_layer)
        .try_init()?;
    Ok(guard)
}
