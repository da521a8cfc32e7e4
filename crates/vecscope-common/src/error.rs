//! Error definitions for vecscope

use thiserror::Error;

/// Represents errors that can occur while querying or mutating a namespace.
///
/// # Example
/// ```rust
/// use vecscope_common::ScopeError;
///
/// fn example() -> vecscope_common::Result<()> {
///     Err(ScopeError::NotFound("namespace 'docs'".into()))
/// }
///
/// match example() {
///     Ok(_) => println!("Success"),
///     Err(e) => println!("Error occurred: {e}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Initialization(String),
}

pub type Result<T> = std::result::Result<T, ScopeError>;

impl ScopeError {
    /// Get the inner message without the type prefix.
    ///
    /// This is the text shown on the UI error channel.
    pub fn message(&self) -> &str {
        match self {
            ScopeError::Io(msg) => msg,
            ScopeError::Network(msg) => msg,
            ScopeError::Backend(msg) => msg,
            ScopeError::Parse(msg) => msg,
            ScopeError::TypeError { expected, .. } => expected,
            ScopeError::NotFound(msg) => msg,
            ScopeError::InvalidOperation(msg) => msg,
            ScopeError::Config(msg) => msg,
            ScopeError::Initialization(msg) => msg,
        }
    }

    /// Get a short error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            ScopeError::Io(_) => "io_error",
            ScopeError::Network(_) => "network_error",
            ScopeError::Backend(_) => "backend_error",
            ScopeError::Parse(_) => "parse_error",
            ScopeError::TypeError { .. } => "type_error",
            ScopeError::NotFound(_) => "not_found",
            ScopeError::InvalidOperation(_) => "invalid_operation",
            ScopeError::Config(_) => "config_error",
            ScopeError::Initialization(_) => "initialization_error",
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScopeError::Network(_) | ScopeError::Io(_))
    }
}

impl From<std::io::Error> for ScopeError {
    fn from(err: std::io::Error) -> Self {
        ScopeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ScopeError {
    fn from(err: serde_json::Error) -> Self {
        ScopeError::Parse(err.to_string())
    }
}
