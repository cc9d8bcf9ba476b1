//! Subscriber installation.
//!
//! `RUST_LOG` selects the filter (default `info`); `WINDCMS_LOG_FORMAT=pretty`
//! switches from JSON lines to human-readable output. Targets are kept so
//! `audit` events can be routed downstream.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";
const FORMAT_ENV: &str = "WINDCMS_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var(FORMAT_ENV).as_deref() {
            Ok("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    init_with(LogFormat::from_env());
}

/// Returns whether this call installed the subscriber.
pub fn init_with(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_with(LogFormat::Json);
        assert!(!init_with(LogFormat::Pretty));
        ::tracing::info!(target: "audit", "subscriber ready");
    }
}
