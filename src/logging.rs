use std::env;
use std::fmt;

pub const LOG_FILTER_ENV: &str = "PRIME_CORO_LOG";
pub const LOG_FORMAT_ENV: &str = "PRIME_CORO_LOG_FORMAT";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    /// Used when no filter directive is given.
    pub level: LogLevel,
    /// `EnvFilter` directive, e.g. `prime_coro::runtime=debug`.
    pub filter: Option<String>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: LogLevel::Warn,
            filter: None,
        }
    }
}

impl LogOptions {
    #[must_use]
    pub fn from_env() -> Self {
        let filter = env::var(LOG_FILTER_ENV).ok();
        let format = env::var(LOG_FORMAT_ENV).ok();
        apply_env_overrides(Self::default(), filter.as_deref(), format.as_deref())
    }

    fn directive(&self) -> String {
        self.filter
            .clone()
            .unwrap_or_else(|| self.level.to_string())
    }
}

fn apply_env_overrides(
    mut options: LogOptions,
    filter: Option<&str>,
    format: Option<&str>,
) -> LogOptions {
    if let Some(spec) = filter.map(str::trim).filter(|spec| !spec.is_empty()) {
        // A bare level keeps the structured form; anything else is a directive.
        match LogLevel::parse(spec) {
            Some(level) => options.level = level,
            None => options.filter = Some(spec.to_string()),
        }
    }
    if let Some(format) = format.and_then(LogFormat::parse) {
        options.format = format;
    }
    options
}

/// Installs the global subscriber, writing to stderr. Later calls are
/// no-ops.
pub fn init_logging(options: &LogOptions) {
    use std::io::IsTerminal;
    use std::sync::OnceLock;
    use tracing_subscriber::{fmt, EnvFilter};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let use_ansi = env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let directive = options.directive();
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));
        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_ansi(use_ansi)
            .with_writer(std::io::stderr)
            .with_target(true);
        let installed = match options.format {
            LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
            LogFormat::Text => tracing::subscriber::set_global_default(builder.compact().finish()),
        };
        if installed.is_err() {
            tracing::debug!("a global subscriber was already installed");
        }
    });
}
