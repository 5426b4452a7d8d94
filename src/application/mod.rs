//! Application layer - Use cases and application services
//!
//! The relay drives the session aggregates from transport events and applies
//! the rewrite policy of each direction before forwarding.

pub mod dump;
pub mod relay;

pub use relay::{Relay, RelayConfig};
