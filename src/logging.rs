use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub max_files: usize,
    pub log_directory: PathBuf,
    pub include_spans: bool,
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: true,
            console_enabled: true,
            max_files: 5,
            log_directory: PathBuf::from("logs"),
            include_spans: false,
            include_targets: true,
        }
    }
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging system
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers = Vec::new();

    if config.console_enabled {
        let console_layer = fmt::layer()
            .with_target(config.include_targets)
            .with_span_events(span_events(config.include_spans))
            .with_writer(std::io::stdout)
            .boxed();

        layers.push(console_layer);
    }

    if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("homefix")
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(&config.log_directory)?;

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_target(config.include_targets)
            .with_span_events(span_events(config.include_spans))
            .with_writer(file_appender)
            .boxed();

        layers.push(file_layer);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_enabled {
        info!("Log directory: {}", config.log_directory.display());
    }

    Ok(())
}

/// Structured fields attached to a log event
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub request_id: Option<String>,
    pub ticket_id: Option<String>,
    pub url: Option<String>,
    pub duration_ms: Option<u64>,
    pub status: Option<String>,
    pub error_category: Option<String>,
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl LogContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn with_request_id(self, request_id: impl Into<String>) -> Self {
        Self { request_id: Some(request_id.into()), ..self }
    }

    pub fn with_ticket_id(self, ticket_id: impl Into<String>) -> Self {
        Self { ticket_id: Some(ticket_id.into()), ..self }
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), ..self }
    }

    pub fn with_duration(self, duration: std::time::Duration) -> Self {
        Self { duration_ms: Some(duration.as_millis() as u64), ..self }
    }

    pub fn with_status(self, status: impl Into<String>) -> Self {
        Self { status: Some(status.into()), ..self }
    }

    pub fn with_error_category(self, category: impl Into<String>) -> Self {
        Self { error_category: Some(category.into()), ..self }
    }

    /// Extra field, e.g. `with_field("status_code", 503)` or `with_field("has_image", true)`
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.additional_fields.insert(key.into(), value.into());
        self
    }
}

/// Emit one event carrying every `LogContext` field. Used by the `log_*!` macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __log_with_context {
    ($level:expr, $context:expr, $message:expr $(, error = $error:expr)?) => {{
        let context = &$context;
        tracing::event!(
            $level,
            component = %context.component,
            operation = %context.operation,
            request_id = context.request_id.as_deref(),
            ticket_id = context.ticket_id.as_deref(),
            url = context.url.as_deref(),
            duration_ms = context.duration_ms,
            status = context.status.as_deref(),
            error_category = context.error_category.as_deref(),
            additional_fields = ?context.additional_fields,
            $(error = %$error,)?
            "{}", $message
        );
    }};
}

#[macro_export]
macro_rules! log_info {
    ($context:expr, $message:expr) => {
        $crate::__log_with_context!(tracing::Level::INFO, $context, $message)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($context:expr, $message:expr) => {
        $crate::__log_with_context!(tracing::Level::WARN, $context, $message)
    };
    ($context:expr, $error:expr, $message:expr) => {
        $crate::__log_with_context!(tracing::Level::WARN, $context, $message, error = $error)
    };
}

#[macro_export]
macro_rules! log_error {
    ($context:expr, $message:expr) => {
        $crate::__log_with_context!(tracing::Level::ERROR, $context, $message)
    };
    ($context:expr, $error:expr, $message:expr) => {
        $crate::__log_with_context!(tracing::Level::ERROR, $context, $message, error = $error)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($context:expr, $message:expr) => {
        $crate::__log_with_context!(tracing::Level::DEBUG, $context, $message)
    };
}

/// Times an operation from creation and logs it once, with `duration_ms`, when finished
pub struct PerformanceLogger {
    context: LogContext,
    start_time: std::time::Instant,
}

impl PerformanceLogger {
    pub fn new(context: LogContext) -> Self {
        Self {
            context,
            start_time: std::time::Instant::now(),
        }
    }

    fn into_timed_context(self) -> LogContext {
        let elapsed = self.start_time.elapsed();
        self.context.with_duration(elapsed)
    }

    pub fn finish(self, message: &str) {
        let context = self.into_timed_context();
        crate::log_info!(context, message);
    }

    pub fn finish_with_status(self, message: &str, status: impl Into<String>) {
        let context = self.into_timed_context().with_status(status);
        crate::log_info!(context, message);
    }

    pub fn finish_with_error(self, message: &str, error: &crate::error::HomeFixError) {
        let context = self
            .into_timed_context()
            .with_status("error")
            .with_error_category(error.category());
        crate::log_error!(context, error, message);
    }
}

/// Request ID generation
pub struct RequestIdGenerator;

impl RequestIdGenerator {
    pub fn generate() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let timestamp = chrono::Utc::now().timestamp_millis();
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

        format!("req-{}-{:04}", timestamp, counter % 10000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_creation() {
        let context = LogContext::new("scraper", "fetch_html")
            .with_request_id("req-123")
            .with_ticket_id("ticket-1")
            .with_url("https://www.homedepot.com/s/caulk")
            .with_field("status_code", 503)
            .with_field("store", "Home Depot");

        assert_eq!(context.component, "scraper");
        assert_eq!(context.operation, "fetch_html");
        assert_eq!(context.request_id.as_deref(), Some("req-123"));
        assert_eq!(context.ticket_id.as_deref(), Some("ticket-1"));
        assert!(context.additional_fields.contains_key("store"));
        assert_eq!(context.additional_fields["status_code"], serde_json::json!(503));
    }

    #[test]
    fn test_with_duration_records_millis() {
        let context = LogContext::new("core", "analyze")
            .with_duration(std::time::Duration::from_millis(1500));
        assert_eq!(context.duration_ms, Some(1500));
    }

    #[test]
    fn test_request_id_generation() {
        let id1 = RequestIdGenerator::generate();
        let id2 = RequestIdGenerator::generate();

        assert_ne!(id1, id2);
        assert!(id1.starts_with("req-"));
        assert!(id2.starts_with("req-"));
    }
}
