use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Span};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// The protocol side a process plays. A driver that launches its engine
/// shares stderr with it, so every event carries the role and process id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Driver,
    Engine,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Engine => "engine",
            Role::Tool => "tool",
        }
    }
}

/// Root span for the whole run. Created at ERROR so it is enabled at every
/// `--log-level`.
pub fn role_span(role: Role) -> Span {
    tracing::span!(
        Level::ERROR,
        "ipisock",
        role = role.as_str(),
        pid = std::process::id()
    )
}

/// Install the stderr subscriber. Stdout stays reserved for results.
///
/// At trace level the event target is shown so wire traffic can be told
/// apart from lifecycle events.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(level == LogLevel::Trace);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
