//! Tracing and logging setup (§10.1)

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize tracing with default configuration.
pub fn init_tracing() {
    init_tracing_with_config(TracingConfig::default());
}

/// Initialize tracing with a custom configuration.
pub fn init_tracing_with_config(config: TracingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.default_level));

    let fmt_layer = fmt::layer()
        .with_span_events(config.span_events.clone())
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_thread_names(config.show_thread_names)
        .with_file(config.show_file)
        .with_line_number(config.show_line_number);

    let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if config.json_output {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(config.span_events)
            .with_target(true)
            .with_thread_ids(true);
        subscriber.with(json_layer).init();
    } else {
        subscriber.init();
    }
}

/// Tracing configuration (§6 ambient observability config).
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default log level if `RUST_LOG` is not set.
    pub default_level: String,
    /// Which span lifecycle events to log.
    pub span_events: FmtSpan,
    /// Show target module in logs.
    pub show_target: bool,
    /// Show thread IDs.
    pub show_thread_ids: bool,
    /// Show thread names.
    pub show_thread_names: bool,
    /// Show source file.
    pub show_file: bool,
    /// Show line numbers.
    pub show_line_number: bool,
    /// Output logs as JSON.
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: "ruleforge=debug,info".to_string(),
            span_events: FmtSpan::CLOSE,
            show_target: true,
            show_thread_ids: false,
            show_thread_names: false,
            show_file: false,
            show_line_number: false,
            json_output: false,
        }
    }
}

impl TracingConfig {
    /// A production configuration: info-level, JSON output, no span noise.
    pub fn production() -> Self {
        Self {
            default_level: "ruleforge=info,warn".to_string(),
            span_events: FmtSpan::NONE,
            json_output: true,
            ..Self::default()
        }
    }

    /// A development configuration: human-readable, file/line annotated.
    pub fn development() -> Self {
        Self { show_file: true, show_line_number: true, ..Self::default() }
    }

    /// A verbose configuration for debugging, including span enter/exit.
    pub fn verbose() -> Self {
        Self {
            default_level: "ruleforge=trace,debug".to_string(),
            span_events: FmtSpan::ENTER | FmtSpan::EXIT | FmtSpan::CLOSE,
            show_thread_ids: true,
            show_thread_names: true,
            show_file: true,
            show_line_number: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_quiet() {
        let config = TracingConfig::default();
        assert_eq!(config.default_level, "ruleforge=debug,info");
        assert!(!config.json_output);
    }

    #[test]
    fn production_config_is_json() {
        let config = TracingConfig::production();
        assert!(config.json_output);
        assert!(!config.show_file);
    }

    #[test]
    fn development_config_shows_file_and_line() {
        let config = TracingConfig::development();
        assert!(config.show_file);
        assert!(config.show_line_number);
    }
}
