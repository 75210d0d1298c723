//! Structured logging setup (ambient addition, §2.1): `tracing`
//! spans around the long-lived tasks, initialized via `tracing-subscriber`
//! with an env-filter, systemd-aware formatting, and the source tree's
//! custom UTC+hostname timer. `output: "file"` rotates daily through
//! `tracing-appender`, matching the ambient addition's file-logging
//! requirement the source tree's stdout-only setup didn't need.

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Guard that must stay alive for the lifetime of the process when logging
/// to a file; dropping it stops the background flush thread.
pub struct LoggingGuard {
    _appender_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn setup_logging(config: &LoggingConfig, verbose: bool) -> LoggingGuard {
    use tracing_subscriber::fmt;

    let level = if verbose { "trace" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let is_systemd = std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    if config.output == "file" {
        let file_path = std::path::Path::new(&config.file_path);
        let directory = file_path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("meshledger.log");
        let _ = std::fs::create_dir_all(directory);

        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if config.format == "json" {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_thread_ids(false)
                .init();
        } else {
            fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_timer(CustomTimer { hostname: short_hostname })
                .compact()
                .init();
        }
        return LoggingGuard {
            _appender_guard: Some(guard),
        };
    }

    match config.format.as_str() {
        "json" => {
            fmt().json().with_env_filter(filter).with_thread_ids(false).init();
        }
        _ => {
            if is_systemd {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .without_time()
                    .compact()
                    .init();
            } else {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_timer(CustomTimer { hostname: short_hostname })
                    .compact()
                    .init();
            }
        }
    }

    LoggingGuard { _appender_guard: None }
}

/// UTC time plus short hostname, matching the source tree's operator-facing
/// timestamp shape.
struct CustomTimer {
    hostname: String,
}

impl FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        use chrono::Utc;
        let now = Utc::now();
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}
