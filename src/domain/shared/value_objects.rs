//! Shared value objects used across the framing, rewriting and session layers

use super::literal::{address_len, port_len};
use std::fmt;
use std::net::SocketAddrV4;

/// Session identifier, allocated sequentially by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u32);

impl SessionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque transport handle issued by the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Textual address/port pair as it appears in SIP text
///
/// Values built from socket addresses are canonical. Values learned from a
/// message keep the literal bytes they were found with, so later matches are
/// exact-text matches against the same spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddrPort {
    addr: String,
    port: String,
}

impl AddrPort {
    pub fn from_socket_addr(addr: SocketAddrV4) -> Self {
        Self {
            addr: addr.ip().to_string(),
            port: addr.port().to_string(),
        }
    }

    /// Build from literal bytes; both must be complete literals.
    pub fn from_literal(addr: &[u8], port: &[u8]) -> Option<Self> {
        if address_len(addr) != Some(addr.len()) {
            return None;
        }
        if !port.is_empty() && port_len(port) != Some(port.len()) {
            return None;
        }

        Some(Self {
            addr: String::from_utf8_lossy(addr).into_owned(),
            port: String::from_utf8_lossy(port).into_owned(),
        })
    }

    /// Address only; rewriting with this value leaves ports untouched.
    pub fn address_only(addr: &[u8]) -> Option<Self> {
        Self::from_literal(addr, b"")
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn has_port(&self) -> bool {
        !self.port.is_empty()
    }

    /// Exact-text comparison of the address part.
    pub fn matches_address(&self, literal: &[u8]) -> bool {
        self.addr.as_bytes() == literal
    }
}

impl From<SocketAddrV4> for AddrPort {
    fn from(addr: SocketAddrV4) -> Self {
        Self::from_socket_addr(addr)
    }
}

impl fmt::Display for AddrPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port.is_empty() {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{}:{}", self.addr, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_port_from_socket_addr() {
        let value = AddrPort::from_socket_addr("192.168.178.1:5060".parse().unwrap());
        assert_eq!(value.address(), "192.168.178.1");
        assert_eq!(value.port(), "5060");
        assert_eq!(value.to_string(), "192.168.178.1:5060");
    }

    #[test]
    fn test_addr_port_literal_keeps_spelling() {
        let value = AddrPort::from_literal(b"010.0.0.1", b"5060").unwrap();
        assert!(value.matches_address(b"010.0.0.1"));
        assert!(!value.matches_address(b"10.0.0.1"));
    }

    #[test]
    fn test_addr_port_literal_rejects_partial() {
        assert!(AddrPort::from_literal(b"1.2.3.4x", b"5060").is_none());
        assert!(AddrPort::from_literal(b"1.2.3.4", b"99999").is_none());
        assert!(AddrPort::address_only(b"10.0.0.5").is_some());
    }

    #[test]
    fn test_address_only_display() {
        let value = AddrPort::address_only(b"10.0.0.5").unwrap();
        assert!(!value.has_port());
        assert_eq!(value.to_string(), "10.0.0.5");
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId::new(7).to_string(), "7");
        assert_eq!(Handle::new(3).to_string(), "#3");
    }
}
