//! Proxy result type

use super::error::ProxyError;

/// Standard result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
