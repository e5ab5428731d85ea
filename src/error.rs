//! Error types for the sensor mesh

use thiserror::Error;

/// Result type alias for sensor mesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in any tier
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration or reading payload
    #[error("validation error: {0}")]
    Validation(String),

    /// Snapshot is well formed but belongs to a different tier role
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Referenced id is not known to this tier
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure talking to another tier
    #[error("transport error talking to {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    /// Another tier answered with a non-success status
    #[error("{target} answered {status}: {body}")]
    Upstream {
        target: String,
        status: u16,
        body: String,
    },

    /// Failure while activating a configuration
    #[error("apply error: {0}")]
    Apply(String),

    /// Sensor driver failure
    #[error("driver error: {0}")]
    Driver(String),

    /// Process configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse error classes used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transport,
    Apply,
    Internal,
}

impl ErrorKind {
    /// Stable name used in error envelopes
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::Transport => "TransportError",
            Self::Apply => "ApplyError",
            Self::Internal => "InternalError",
        }
    }
}

impl Error {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::TypeMismatch(_)
            | Self::Serialization(_)
            | Self::Toml(_)
            | Self::Yaml(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transport { .. } | Self::Upstream { .. } => ErrorKind::Transport,
            Self::Apply(_) | Self::Driver(_) => ErrorKind::Apply,
            Self::Config(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Wrap a reqwest failure with the endpoint it was aimed at
    pub fn transport(target: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            target: target.into(),
            source,
        }
    }

    /// Whether a parent reported that it does not know the caller
    #[must_use]
    pub const fn is_unknown_entity(&self) -> bool {
        matches!(self, Self::Upstream { status: 500, .. })
    }
}
