//! Domain layer - Core rules of the relay
//!
//! This layer contains:
//! - Aggregates: the per-device session and its legs
//! - Value Objects: identifiers and textual address literals
//! - The registry owning every live session

pub mod session;
pub mod shared;

// Re-export commonly used types
pub use shared::{ProxyError, Result};
