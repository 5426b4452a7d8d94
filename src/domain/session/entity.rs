//! Session entities

use crate::domain::shared::value_objects::{AddrPort, Handle};
use crate::infrastructure::protocols::sip::Message;

/// One established transport leg and the message stream framed on it
#[derive(Debug)]
pub struct Endpoint {
    /// Transport handle
    handle: Handle,
    /// Remote address of the leg
    pub peer: AddrPort,
    /// Local address of the leg
    pub local: AddrPort,
    /// Framing state of inbound bytes
    pub message: Message,
}

impl Endpoint {
    pub fn new(handle: Handle, peer: AddrPort, local: AddrPort) -> Self {
        Self::with_message(handle, peer, local, Message::new())
    }

    /// Endpoint whose first message was framed before the leg existed.
    pub fn with_message(handle: Handle, peer: AddrPort, local: AddrPort, message: Message) -> Self {
        Self {
            handle,
            peer,
            local,
            message,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}
