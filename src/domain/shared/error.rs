//! Proxy errors

use thiserror::Error;

/// Proxy result type
pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Framing or grammar violation in an inbound message
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Buffer growth would exceed the hard size cap
    #[error("Message too large: {size} bytes")]
    ResourceExhausted { size: usize },

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// A well-formed message the relay refuses to proxy
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl ProxyError {
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::Malformed(reason.into())
    }

    pub fn policy<S: Into<String>>(reason: S) -> Self {
        Self::PolicyViolation(reason.into())
    }

    pub fn configuration<E: std::fmt::Display>(err: E) -> Self {
        Self::Configuration(err.to_string())
    }

    /// An oversized message is handled exactly like a malformed one.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::ResourceExhausted { .. })
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::ResourceExhausted { .. } => "too_large",
            Self::Io(_) => "io",
            Self::PolicyViolation(_) => "policy",
            Self::Configuration(_) => "configuration",
        }
    }
}
