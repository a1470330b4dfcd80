/// Logging setup: terminal output plus daily-rotated text and JSON files.
///
/// Log level comes from `RUST_LOG` (default `info`), e.g.
/// `RUST_LOG=academic_crawler=debug,reqwest=warn`.
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the background log writers alive. Dropping it flushes and stops them.
pub struct LoggingGuard {
    _text: WorkerGuard,
    _json: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber writing to stdout, `<log_dir>/app.log` and
/// `<log_dir>/app.json.log`.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let filter = env_filter();

    let text_file_appender = tracing_appender::rolling::daily(log_path, "app.log");
    let (text_writer, text_guard) = tracing_appender::non_blocking(text_file_appender);

    let json_file_appender = tracing_appender::rolling::daily(log_path, "app.json.log");
    let (json_writer, json_guard) = tracing_appender::non_blocking(json_file_appender);

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(filter.clone());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(filter.clone());

    // Terminal output stays terse; the files carry the detail.
    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()?;

    tracing::debug!(dir = %log_path.display(), "logging initialized");

    Ok(LoggingGuard {
        _text: text_guard,
        _json: json_guard,
    })
}
