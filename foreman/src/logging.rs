// Logging for Foreman
//
// Thin layer over the `tracing` ecosystem. The library itself only emits
// events; installing a subscriber is left to the application, which can use
// one of the presets below.
//
// ```rust
// use foreman::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // Or pick individual settings
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// The domain macros attach consistent field names to pool events:
//
// ```rust
// use foreman::{log_pool, log_worker};
//
// log_worker!(3, "ready");
// log_worker!(3, "restarted", restart_count = 2);
// log_pool!("scale_up", workers = 4);
// ```

use std::io;
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the subscriber installed by [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn build_filter(config: &LogConfig) -> EnvFilter {
    let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    if let Some(filters) = &config.target_filters {
        for filter in filters.split(',') {
            if let Ok(directive) = filter.trim().parse() {
                env_filter = env_filter.add_directive(directive);
            }
        }
    }

    env_filter
}

/// Install the global subscriber. Only the first call in a process has an effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let env_filter = build_filter(&config);
        let registry = tracing_subscriber::registry().with(env_filter);

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(fmt::layer().json().flatten_event(true)))
        } else {
            let fmt_layer = fmt::layer()
                .with_ansi(atty::is(atty::Stream::Stdout))
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_thread_names(config.show_thread_info)
                .with_thread_ids(config.show_thread_info);

            if config.show_time {
                Box::new(registry.with(fmt_layer))
            } else {
                Box::new(registry.with(fmt_layer.without_time()))
            }
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Open `path` for appending, creating it if needed.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;

    Ok(Box::new(file))
}

/// Install a subscriber writing to the console and to `log_file`.
///
/// The file is opened once up front so a bad path is reported to the caller
/// instead of being swallowed by the writer.
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    // Probe the path before committing to it.
    file_writer(log_file)?;

    INIT.call_once(|| {
        let env_filter = build_filter(&config);

        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(std::io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG everywhere, TRACE for the coordinator loop, with file/line info.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("foreman=debug,foreman::coordinator=trace".to_string()),
    });
}

/// INFO level JSON lines without source locations, for log aggregators.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// WARN and above, compact, for test binaries.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Span covering one pool operation.
#[macro_export]
macro_rules! pool_span {
    ($operation:expr) => {
        $crate::logging::info_span!("pool", operation = $operation)
    };
    ($operation:expr, $($fields:tt)*) => {
        $crate::logging::info_span!("pool", operation = $operation, $($fields)*)
    };
}

/// Span covering the lifetime of one worker instance.
#[macro_export]
macro_rules! worker_span {
    ($worker_id:expr, $instance:expr) => {
        $crate::logging::debug_span!("worker", worker_id = %$worker_id, instance = $instance)
    };
}

/// Worker lifecycle events (spawned, ready, restarted, evicted, ...).
#[macro_export]
macro_rules! log_worker {
    ($worker_id:expr, $event:expr) => {
        $crate::logging::info!(worker_id = %$worker_id, event = $event)
    };
    ($worker_id:expr, $event:expr, $($fields:tt)*) => {
        $crate::logging::info!(worker_id = %$worker_id, event = $event, $($fields)*)
    };
}

/// Task transitions. Debug level: one line per task per transition.
#[macro_export]
macro_rules! log_task {
    ($task_id:expr, $status:expr) => {
        $crate::logging::debug!(task_id = %$task_id, status = $status)
    };
    ($task_id:expr, $status:expr, $($fields:tt)*) => {
        $crate::logging::debug!(task_id = %$task_id, status = $status, $($fields)*)
    };
}

/// Pool-level events such as scaling decisions and shutdown.
#[macro_export]
macro_rules! log_pool {
    ($operation:expr) => {
        $crate::logging::info!(operation = $operation)
    };
    ($operation:expr, $($fields:tt)*) => {
        $crate::logging::info!(operation = $operation, $($fields)*)
    };
}

/// Error events with the error rendered through `Display`.
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        $crate::logging::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        $crate::logging::error!(error = %$error, $($fields)*)
    };
}

/// The dispatcher active on the calling thread.
///
/// Dedicated worker threads install it so their events reach the same
/// subscriber as the coordinator's.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, debug_span, error, info, info_span, trace, warn};
