//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - SIP message framing and in-place rewriting
//! - The socket transport feeding the relay

pub mod protocols;
