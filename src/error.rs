use std::fmt;
use thiserror::Error;

/// Error types for the HomeFix backend
#[derive(Error, Debug)]
pub enum HomeFixError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration file: {path}")]
    InvalidConfig { path: String },

    // Database errors
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Migration failed: {version}")]
    Migration { version: i32 },

    // Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("HTTP request failed: {url} - {status}")]
    HttpRequest { url: String, status: u16 },

    // Model errors
    #[error("LLM processing error: {message}")]
    LLM { message: String },

    #[error("Model output rejected: {message}")]
    ModelOutput { message: String },

    // Request errors
    #[error("{message}")]
    InputValidation { message: String },

    #[error("Payload too large: {size_bytes} bytes (limit {limit_bytes})")]
    PayloadTooLarge { size_bytes: usize, limit_bytes: usize },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    // Image errors
    #[error("Image processing failed: {message}")]
    ImageProcessing { message: String },

    // System errors
    #[error("File system error: {path}")]
    FileSystem { path: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HomeFixError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::LLM { message: message.into() }
    }

    /// Create a request validation error; the message is shown to the caller as-is
    pub fn input(message: impl Into<String>) -> Self {
        Self::InputValidation { message: message.into() }
    }

    pub fn image(message: impl Into<String>) -> Self {
        Self::ImageProcessing { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the caller can carry on with a degraded result
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::HttpRequest { .. }
            | Self::LLM { .. }
            | Self::ModelOutput { .. }
            | Self::ImageProcessing { .. } => true,

            Self::Configuration { .. }
            | Self::InvalidConfig { .. }
            | Self::Database { .. }
            | Self::Migration { .. }
            | Self::InputValidation { .. }
            | Self::PayloadTooLarge { .. }
            | Self::NotFound { .. }
            | Self::FileSystem { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::InvalidConfig { .. } => "configuration",
            Self::Database { .. } | Self::Migration { .. } => "database",
            Self::Network { .. } | Self::HttpRequest { .. } => "network",
            Self::LLM { .. } | Self::ModelOutput { .. } => "llm",
            Self::InputValidation { .. } | Self::PayloadTooLarge { .. } | Self::NotFound { .. } => "request",
            Self::ImageProcessing { .. } => "image",
            Self::FileSystem { .. } | Self::Internal { .. } => "internal",
        }
    }

    /// HTTP status code used when the error reaches the API surface
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InputValidation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::PayloadTooLarge { .. } => 413,
            _ => 500,
        }
    }
}

/// Result type alias for the HomeFix backend
pub type HomeFixResult<T> = std::result::Result<T, HomeFixError>;

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub component: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub request_id: Option<String>,
    pub ticket_id: Option<String>,
    pub additional_data: std::collections::HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            component: component.into(),
            timestamp: chrono::Utc::now(),
            request_id: None,
            ticket_id: None,
            additional_data: std::collections::HashMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_ticket_id(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }
}

/// Error paired with the operation that produced it
#[derive(Debug)]
pub struct ContextualError {
    pub error: HomeFixError,
    pub context: ErrorContext,
}

impl ContextualError {
    pub fn new(error: HomeFixError, context: ErrorContext) -> Self {
        Self { error, context }
    }
}

impl fmt::Display for ContextualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}::{}", self.error, self.context.component, self.context.operation)?;

        if let Some(ticket_id) = &self.context.ticket_id {
            write!(f, " [ticket: {}]", ticket_id)?;
        }

        if let Some(request_id) = &self.context.request_id {
            write!(f, " [req: {}]", request_id)?;
        }

        Ok(())
    }
}

impl std::error::Error for ContextualError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Macro for creating contextual errors
#[macro_export]
macro_rules! contextual_error {
    ($error:expr, $operation:expr, $component:expr) => {
        $crate::error::ContextualError::new(
            $error,
            $crate::error::ErrorContext::new($operation, $component)
        )
    };

    ($error:expr, $operation:expr, $component:expr, $($key:expr => $value:expr),*) => {
        {
            let mut context = $crate::error::ErrorContext::new($operation, $component);
            $(
                context = context.with_data($key, $value);
            )*
            $crate::error::ContextualError::new($error, context)
        }
    };
}

impl From<anyhow::Error> for HomeFixError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal { message: err.to_string() }
    }
}

impl From<rusqlite::Error> for HomeFixError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database { message: err.to_string() }
    }
}

impl From<crate::analysis::AnalysisError> for HomeFixError {
    fn from(err: crate::analysis::AnalysisError) -> Self {
        Self::ModelOutput { message: err.to_string() }
    }
}

#[cfg(feature = "api")]
impl actix_web::ResponseError for HomeFixError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(HomeFixError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        // Internal details stay in the logs
        let message = if HomeFixError::status_code(self) < 500 {
            self.to_string()
        } else {
            "Internal server error".to_string()
        };
        actix_web::HttpResponse::build(actix_web::ResponseError::status_code(self))
            .json(serde_json::json!({ "error": message }))
    }
}
