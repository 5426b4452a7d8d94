//! Contact identity extraction
//!
//! A device is identified by the user part of the `sip:` URI it announces in
//! `Contact`, `From` or `To`. The same identity keys its TCP and UDP legs and
//! survives re-registration from a new address.

use crate::domain::shared::literal::{find_address, find_port};
use crate::domain::shared::AddrPort;
use std::ops::Range;

const SIP_SCHEME: &[u8] = b"sip:";

/// Range of the identity inside a header value.
///
/// Accepts an optional `<`, then a case-insensitive `sip:` scheme. The
/// identity runs up to the next `@` and must not be empty.
pub fn identity_range(value: &[u8]) -> Option<Range<usize>> {
    let start = usize::from(value.first() == Some(&b'<'));
    let rest = &value[start..];

    if rest.len() <= SIP_SCHEME.len() || !rest[..SIP_SCHEME.len()].eq_ignore_ascii_case(SIP_SCHEME)
    {
        return None;
    }

    let id_at = start + SIP_SCHEME.len();
    let id_len = value[id_at..].iter().position(|&b| b == b'@')?;
    (id_len > 0).then_some(id_at..id_at + id_len)
}

/// Identity bytes of a header value.
pub fn identity(value: &[u8]) -> Option<&[u8]> {
    identity_range(value).map(|range| &value[range])
}

/// Identity plus the `address:port` that directly follows its `@`.
pub fn decode_contact(value: &[u8]) -> Option<(&[u8], AddrPort)> {
    let range = identity_range(value)?;
    let addr_at = range.end + 1;

    let (found_at, addr_len) = find_address(value, addr_at, value.len())?;
    if found_at != addr_at {
        return None;
    }

    let addr_end = addr_at + addr_len;
    let (port_at, port_len) = find_port(value, addr_end, value.len())?;
    let address = AddrPort::from_literal(
        &value[addr_at..addr_end],
        &value[port_at..port_at + port_len],
    )?;

    Some((&value[range], address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert_eq!(identity(b"<sip:abc@1.2.3.4:1111>"), Some(&b"abc"[..]));
        assert_eq!(identity(b"SIP:620@fritz.box;tag=9"), Some(&b"620"[..]));
        assert_eq!(identity(b"<sip:y>"), None);
        assert_eq!(identity(b"<sip:@1.2.3.4>"), None);
        assert_eq!(identity(b"<tel:123@x>"), None);
        assert_eq!(identity(b"sip:"), None);
    }

    #[test]
    fn test_decode_contact() {
        let (id, address) = decode_contact(b"<sip:abc@1.2.3.4:1111>").unwrap();
        assert_eq!(id, b"abc");
        assert_eq!(address.to_string(), "1.2.3.4:1111");

        let (_, address) = decode_contact(b"<sip:abc@1.2.3.4:1111;transport=tcp>").unwrap();
        assert_eq!(address.port(), "1111");
    }

    #[test]
    fn test_decode_contact_requires_address_and_port() {
        assert!(decode_contact(b"<sip:abc@1.2.3.4>").is_none());
        assert!(decode_contact(b"<sip:abc@host:5060>").is_none());
        assert!(decode_contact(b"<sip:abc@ 1.2.3.4:5060>").is_none());
        assert!(decode_contact(b"<sip:abc@1.2.3.4:0>").is_none());
    }
}
