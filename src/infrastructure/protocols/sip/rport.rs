//! RPORT support for NAT traversal (RFC 3581)
//!
//! The proxy tells the Box which externally visible port a request came from
//! by overwriting the `rport=` value of the `Via` header in place.

use super::message::Message;
use super::splice::{Region, ScanWindow};
use crate::domain::shared::literal::port_len;
use crate::domain::shared::{AddrPort, Result};
use tracing::trace;

const RPORT_PARAM: &[u8] = b"rport=";

/// Values of every `rport=` parameter in a `Via` value.
///
/// Yields `(offset, length)` of each valid port literal, in order. The
/// parameter name is matched case-insensitively and must follow a `;`.
pub fn rport_values(via: &[u8]) -> impl Iterator<Item = (usize, usize)> + '_ {
    via.iter()
        .enumerate()
        .filter(|&(_, &b)| b == b';')
        .map(|(i, _)| i + 1)
        .filter(move |&param| {
            via.get(param..param + RPORT_PARAM.len())
                .is_some_and(|name| name.eq_ignore_ascii_case(RPORT_PARAM))
        })
        .filter_map(move |param| {
            let port_at = param + RPORT_PARAM.len();
            port_len(&via[port_at..]).map(|len| (port_at, len))
        })
}

impl Message {
    /// Replace every valid `rport=` value in `Via` with `to`'s port.
    ///
    /// Returns the number of values replaced.
    pub fn rewrite_via_received_port(&mut self, to: &AddrPort) -> Result<usize> {
        let Some(via) = self.fields.via else {
            return Ok(0);
        };
        if !to.has_port() {
            return Ok(0);
        }

        let values: Vec<(usize, usize)> = rport_values(self.span_bytes(via)).collect();

        // Last to first, so earlier offsets stay valid.
        for &(at, len) in values.iter().rev() {
            let mut window = ScanWindow::new(Region::Header, via.offset, via.end());
            self.replace(&mut window, via.offset + at, len, to.port().as_bytes())?;
        }

        if !values.is_empty() {
            trace!("Via rport set to {}", to.port());
        }
        Ok(values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<'a>(via: &'a [u8]) -> Vec<&'a [u8]> {
        rport_values(via).map(|(at, len)| &via[at..at + len]).collect()
    }

    #[test]
    fn test_rport_values() {
        let via = b"SIP/2.0/UDP 192.168.1.100:5060;branch=z9hG4bK776asdhds;rport=51234";
        assert_eq!(values(via), vec![&b"51234"[..]]);
    }

    #[test]
    fn test_rport_values_case_insensitive() {
        let via = b"SIP/2.0/UDP 10.8.0.6:5060;RPort=5062;branch=z9hG4bK1";
        assert_eq!(values(via), vec![&b"5062"[..]]);
    }

    #[test]
    fn test_rport_without_valid_value() {
        let via = b"SIP/2.0/UDP 192.168.1.100:5060;branch=z9hG4bK776asdhds;rport";
        assert!(values(via).is_empty());
        assert!(values(b"SIP/2.0/UDP 1.2.3.4;rport=0").is_empty());
        assert!(values(b"SIP/2.0/UDP 1.2.3.4 rport=5060").is_empty());
    }

    #[test]
    fn test_rewrite_every_rport_value() {
        let bytes = b"SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP 10.8.0.6:5060;rport=5060;branch=z9hG4bK1;rport=6;rport=x\r\n\
From: f\r\n\
To: t\r\n\
Content-Length: 0\r\n\r\n";
        let mut message = Message::new();
        message.feed(bytes).unwrap();

        let to = AddrPort::from_socket_addr("203.0.113.7:41234".parse().unwrap());
        assert_eq!(message.rewrite_via_received_port(&to).unwrap(), 2);

        let via = message.span_bytes(message.fields().via.unwrap());
        assert_eq!(
            via,
            b"SIP/2.0/UDP 10.8.0.6:5060;rport=41234;branch=z9hG4bK1;rport=41234;rport=x"
        );
        assert_eq!(message.span_bytes(message.fields().to.unwrap()), b"t");
        assert_eq!(message.header_len(), bytes.len() + 5);
    }

    #[test]
    fn test_rewrite_via_received_port() {
        let bytes = b"SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP 10.8.0.6:5060;rport=5060;branch=z9hG4bK1\r\n\
From: <sip:620@10.8.0.1>\r\n\
To: <sip:620@10.8.0.1>\r\n\
Content-Length: 0\r\n\r\n";
        let mut message = Message::new();
        message.feed(bytes).unwrap();
        let header_len = message.header_len();

        let to = AddrPort::from_socket_addr("203.0.113.7:41234".parse().unwrap());
        assert_eq!(message.rewrite_via_received_port(&to).unwrap(), 1);

        let via = message.span_bytes(message.fields().via.unwrap());
        assert_eq!(via, b"SIP/2.0/UDP 10.8.0.6:5060;rport=41234;branch=z9hG4bK1");
        assert_eq!(message.header_len(), header_len + 1);
        assert_eq!(message.span_bytes(message.fields().to.unwrap()), b"<sip:620@10.8.0.1>");
    }

    #[test]
    fn test_rewrite_via_without_rport_value() {
        let bytes = b"OPTIONS sip:x SIP/2.0\r\nVia: SIP/2.0/UDP 10.8.0.6;rport\r\nFrom: f\r\nTo: t\r\nContent-Length: 0\r\n\r\n";
        let mut message = Message::new();
        message.feed(bytes).unwrap();

        let to = AddrPort::from_socket_addr("203.0.113.7:41234".parse().unwrap());
        assert_eq!(message.rewrite_via_received_port(&to).unwrap(), 0);
        assert_eq!(message.as_bytes(), bytes);
    }
}
