use crate::error_code::StandardErrorCode;
use std::sync::Arc;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "config.max_concurrency")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_validator", "request_queue")
    pub source: Option<String>,
    /// Explicit retryable override; wins over the standard code's default.
    pub retryable: Option<bool>,
    /// Upstream request id, if the upstream reported one.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Unified error type for the dispatch layer.
///
/// Errors are `Clone` so that a single upstream outcome can be delivered to
/// every caller that was coalesced onto the same in-flight request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream error ({code}{}): {message}{}", format_status(.status), format_context(.context))]
    Upstream {
        code: StandardErrorCode,
        status: Option<u16>,
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Circuit breaker open ({remaining_ms}ms until half-open)")]
    CircuitOpen { remaining_ms: u64 },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("Queue full: {depth} requests already pending")]
    QueueFull { depth: usize },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(", HTTP {}", s),
        None => String::new(),
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if let Some(ref id) = ctx.request_id {
        parts.push(format!("request_id: {}", id));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(e))
    }
}

impl Error {
    /// Upstream failure with an explicit classification.
    pub fn upstream(code: StandardErrorCode, message: impl Into<String>) -> Self {
        Error::Upstream {
            code,
            status: None,
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Upstream failure classified from an HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Error::Upstream {
            code: StandardErrorCode::from_http_status(status),
            status: Some(status),
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Attach context to variants that carry one; others are returned unchanged.
    pub fn with_context(mut self, new_ctx: ErrorContext) -> Self {
        match &mut self {
            Error::Configuration { context, .. }
            | Error::Upstream { context, .. }
            | Error::Runtime { context, .. } => *context = new_ctx,
            _ => {}
        }
        self
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Upstream { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The standard code this error maps to.
    pub fn standard_code(&self) -> StandardErrorCode {
        match self {
            Error::Upstream { code, .. } => *code,
            Error::Timeout { .. } => StandardErrorCode::Timeout,
            Error::Cancelled => StandardErrorCode::Cancelled,
            Error::CircuitOpen { .. } => StandardErrorCode::Overloaded,
            Error::RetryExhausted { last, .. } => last.standard_code(),
            Error::QueueFull { .. } => StandardErrorCode::RateLimited,
            Error::Io(e) => StandardErrorCode::from_io_kind(e.kind()),
            Error::Configuration { .. } => StandardErrorCode::InvalidRequest,
            Error::Runtime { .. } | Error::Serialization(_) => StandardErrorCode::Unknown,
        }
    }

    /// Whether the retry policy may attempt the operation again.
    ///
    /// Only failures of a single upstream attempt are retryable. Capacity
    /// rejections, open breakers, cancellation and already-exhausted retries
    /// always surface directly.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream { code, context, .. } => context.retryable.unwrap_or(code.retryable()),
            Error::Timeout { .. } => true,
            Error::Io(e) => StandardErrorCode::from_io_kind(e.kind()).retryable(),
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self, Error::QueueFull { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Error::RetryExhausted { .. })
    }

    /// The underlying error of a retry-exhaustion failure, or `self`.
    pub fn root(&self) -> &Error {
        match self {
            Error::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}
