//! Error types for cloudmask

/// Result type alias using cloudmask's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cloudmask operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pattern compilation or catalog construction errors
    #[error("pattern error: {0}")]
    Pattern(String),

    /// The bidirectional mapping lost its bijection; the store must be cleared
    #[error("mapping invariant violated: {0}")]
    MappingInvariant(String),

    /// Event bus transport errors
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout errors
    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Create a new pattern error
    pub fn pattern(msg: impl Into<String>) -> Self {
        Self::Pattern(msg.into())
    }

    /// Create a new mapping invariant error
    pub fn mapping_invariant(msg: impl Into<String>) -> Self {
        Self::MappingInvariant(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the mapping store can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MappingInvariant(_))
    }
}
