//! Subscriber setup for the `thinbus` binary.
//!
//! Logs go to stderr; stdout carries command output. `--log-level` applies to
//! the workspace crates only, and a `THINBUS_LOG` directive string replaces it
//! entirely (`THINBUS_LOG=thinbus_engine::poll=trace,warn`).

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive string.
pub const LOG_ENV: &str = "THINBUS_LOG";

const CRATES: [&str; 4] = ["thinbus", "thinbus_message", "thinbus_transport", "thinbus_engine"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Directives that apply this level to the workspace crates and keep
    /// everything else at `warn`.
    pub fn directives(self) -> String {
        let level = self.as_str();
        let mut directives = String::from("warn");
        for krate in CRATES {
            directives.push_str(&format!(",{krate}={level}"));
        }
        directives
    }
}

/// Pick the filter: a parseable `override_directives` wins over `level`.
pub fn build_filter(level: LogLevel, override_directives: Option<&str>) -> EnvFilter {
    let custom = override_directives
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok());
    custom.unwrap_or_else(|| EnvFilter::new(level.directives()))
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, env.as_deref()))
        .with_ansi(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
