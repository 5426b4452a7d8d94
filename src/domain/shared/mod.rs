//! Shared kernel - Common types used across the framing, rewriting and session layers

pub mod error;
pub mod literal;
pub mod result;
pub mod value_objects;

pub use error::ProxyError;
pub use result::Result;
pub use value_objects::*;
