use std::path::Path;
use tracing::subscriber::set_global_default;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Install the global subscriber: JSON lines into a daily-rolling `auth.log`
/// under `log_dir`, plus human-readable console output.
///
/// `RUST_LOG` overrides `log_level` when set.
pub fn init_logging(log_dir: impl AsRef<Path>, log_level: &str) -> anyhow::Result<()> {
    // Create log directory if it doesn't exist
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation, JSON lines for log shipping
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir.as_ref(), "auth.log");

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_appender)
        .with_target(true)
        .with_thread_ids(true);

    // Console output for local runs
    let console_layer = fmt::layer().with_target(true);

    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    // Fails if a subscriber is already installed
    set_global_default(subscriber)?;

    tracing::info!("Logging initialized with level: {}", log_level);

    Ok(())
}

/// Authentication and admission audit event.
///
/// Never pass a password or a raw token as any argument.
#[macro_export]
macro_rules! auth_event {
    ($action:expr, $subject:expr, $success:expr) => {
        tracing::info!(
            event_type = "authentication",
            action = $action,
            subject = ?$subject,
            success = $success,
            timestamp = chrono::Utc::now().to_rfc3339(),
            "AUTH_EVENT"
        );
    };
    ($action:expr, $subject:expr, $success:expr, $reason:expr) => {
        tracing::info!(
            event_type = "authentication",
            action = $action,
            subject = ?$subject,
            success = $success,
            reason = %$reason,
            timestamp = chrono::Utc::now().to_rfc3339(),
            "AUTH_EVENT"
        );
    };
}
