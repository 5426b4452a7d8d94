//! Interface layer - External interfaces
//!
//! This layer handles:
//! - Command line parsing
//! - Log subscriber setup
//! - Prometheus metrics export

pub mod cli;
pub mod logging;
pub mod metrics;
