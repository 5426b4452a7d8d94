//! Fonbox proxy - A SIP NAT relay built with Rust
//!
//! Relays SIP signalling between a mobile client behind NAT (the Fon) and a
//! fixed call-control box, rewriting the addresses, ports and `Content-Length`
//! inside every message so that each side only ever sees the proxy.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::ProxyError;
pub use domain::shared::result::Result;
