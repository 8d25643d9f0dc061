//! Error types for the relay workspace.

use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for relay components.
///
/// The first five variants are the user-visible taxonomy: they are shown to
/// the invoking user as-is. Everything else is logged and replaced with a
/// generic apology.
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or missing required argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unauthorized actor or ownership mismatch
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Referenced name or anchor is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate name on creation
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Generative-content or persistence call failed
    #[error("External service error: {0}")]
    External(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error.
    pub fn root(&self) -> &Self {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a permission error.
    pub fn is_forbidden(&self) -> bool {
        matches!(self.root(), Self::Forbidden(_))
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }

    /// Check if this is a duplicate-name error.
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Self::AlreadyExists(_))
    }

    /// Whether the error message can be shown to the user verbatim.
    ///
    /// Upstream, configuration, and internal failures are not user facing.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidInput(_) | Self::Forbidden(_) | Self::NotFound(_) | Self::AlreadyExists(_)
        )
    }

    /// Text to show the user for this error.
    pub fn user_message(&self) -> String {
        match self.root() {
            Self::InvalidInput(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::AlreadyExists(msg) => msg.clone(),
            _ => GENERIC_APOLOGY.to_string(),
        }
    }
}

/// Reply sent when an upstream or internal failure occurs.
pub const GENERIC_APOLOGY: &str = "Sorry, I encountered an error while processing your request.";

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
