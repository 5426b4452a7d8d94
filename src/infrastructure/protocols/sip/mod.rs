//! SIP message handling for the relay
//!
//! The proxy never parses the full SIP grammar. It frames messages, locates a
//! handful of headers and rewrites address literals in place:
//! ```text
//! ┌─────────────────────────┐
//! │   Transport             │
//! │  (TCP, UDP legs)        │
//! └───────────┬─────────────┘
//!             │ bytes
//! ┌───────────▼─────────────┐
//! │   Message framing       │
//! │  (buffer, message)      │
//! └───────────┬─────────────┘
//!             │ ready message
//! ┌───────────▼─────────────┐
//! │   Rewriting             │
//! │  (splice, rewrite,      │
//! │   rport, contact)       │
//! └─────────────────────────┘
//! ```

pub mod buffer;
pub mod contact;
pub mod message;
pub mod rewrite;
pub mod rport;
pub mod splice;
pub mod transport;

pub use buffer::Buffer;
pub use message::{
    FrameState, HeaderFields, Message, Span, MAX_BUFFERED_LEN, MAX_MESSAGE_LEN,
};
pub use splice::{Region, ScanWindow};
pub use transport::{Link, TokioTransport, Transport, TransportEvent};
