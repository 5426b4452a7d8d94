//! Session bounded context - one NAT mapping per device

pub mod aggregate;
pub mod entity;
pub mod registry;
pub mod value_object;

pub use aggregate::Session;
pub use entity::Endpoint;
pub use registry::SessionRegistry;
pub use value_object::{LegRole, Protocol, SessionState, Side};
