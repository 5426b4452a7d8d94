//! Textual IPv4 address and port literals
//!
//! Addresses and ports travel as plain text inside SIP headers and SDP
//! bodies. Matching is done on the literal bytes, never on the numeric value:
//! `010.0.0.1` is a valid literal but it does not equal `10.0.0.1`.

/// Longest port literal, `65535`
pub const MAX_PORT_LEN: usize = 5;

fn is_address_boundary(byte: u8) -> bool {
    byte == b'.' || byte.is_ascii_digit()
}

/// Length of the dotted-quad literal starting at `text[0]`.
///
/// Each octet is one to three digits with a value of at most 255. The literal
/// must not run on into another digit or dot.
pub fn address_len(text: &[u8]) -> Option<usize> {
    let mut len = 0;

    for octet in 0..4 {
        if octet > 0 {
            if text.get(len) != Some(&b'.') {
                return None;
            }
            len += 1;
        }

        let digits = text[len..]
            .iter()
            .take(3)
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }

        let value = text[len..len + digits]
            .iter()
            .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'));
        if value > 255 {
            return None;
        }
        len += digits;
    }

    match text.get(len) {
        Some(&next) if is_address_boundary(next) => None,
        _ => Some(len),
    }
}

/// Length of the port literal starting at `text[0]`.
///
/// The whole digit run is taken: one to five digits, no leading zero, value
/// in `1..=65535`.
pub fn port_len(text: &[u8]) -> Option<usize> {
    let run = text.iter().take_while(|b| b.is_ascii_digit()).count();
    if run == 0 || run > MAX_PORT_LEN || text[0] == b'0' {
        return None;
    }

    let value = text[..run]
        .iter()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    (value <= u32::from(u16::MAX)).then_some(run)
}

/// Leftmost address literal in `text[start..end]` as `(offset, length)`.
///
/// A candidate must not be preceded by a digit or dot; the byte before the
/// window still counts for that check.
pub fn find_address(text: &[u8], start: usize, end: usize) -> Option<(usize, usize)> {
    let end = end.min(text.len());
    (start..end)
        .filter(|&i| text[i].is_ascii_digit())
        .filter(|&i| i == 0 || !is_address_boundary(text[i - 1]))
        .find_map(|i| address_len(&text[i..end]).map(|len| (i, len)))
}

/// Port literal directly following an address ending at `addr_end`, as
/// `(offset, length)`. Only `:<port>` qualifies.
pub fn find_port(text: &[u8], addr_end: usize, end: usize) -> Option<(usize, usize)> {
    let end = end.min(text.len());
    if addr_end >= end || text[addr_end] != b':' {
        return None;
    }

    let port_at = addr_end + 1;
    port_len(&text[port_at..end]).map(|len| (port_at, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_len() {
        assert_eq!(address_len(b"192.168.1.100"), Some(13));
        assert_eq!(address_len(b"1.2.3.4:5060"), Some(7));
        assert_eq!(address_len(b"1.2.3.4>"), Some(7));
        assert_eq!(address_len(b"010.0.0.1"), Some(9));
    }

    #[test]
    fn test_address_len_rejects() {
        assert_eq!(address_len(b"256.1.1.1"), None);
        assert_eq!(address_len(b"1.2.3"), None);
        assert_eq!(address_len(b"1.2.3.4.5"), None);
        assert_eq!(address_len(b"1.2.3.4567"), None);
        assert_eq!(address_len(b"1..2.3.4"), None);
        assert_eq!(address_len(b"a.b.c.d"), None);
    }

    #[test]
    fn test_port_len() {
        assert_eq!(port_len(b"5060;transport=tcp"), Some(4));
        assert_eq!(port_len(b"65535"), Some(5));
        assert_eq!(port_len(b"1"), Some(1));
        assert_eq!(port_len(b"65536"), None);
        assert_eq!(port_len(b"123456"), None);
        assert_eq!(port_len(b"0"), None);
        assert_eq!(port_len(b"0506"), None);
        assert_eq!(port_len(b""), None);
    }

    #[test]
    fn test_find_address() {
        let text = b"Contact: <sip:abc@10.8.0.6:5060>";
        assert_eq!(find_address(text, 0, text.len()), Some((18, 8)));
        assert_eq!(find_address(text, 19, text.len()), None);
    }

    #[test]
    fn test_find_address_skips_embedded_numbers() {
        let text = b"v=0 o=- 1234.5.6.7.8 x 9.9.9.9";
        assert_eq!(find_address(text, 0, text.len()), Some((23, 7)));
    }

    #[test]
    fn test_find_address_respects_window_end() {
        let text = b"a 1.2.3.4 b";
        assert_eq!(find_address(text, 0, 6), None);
        assert_eq!(find_address(text, 0, 9), Some((2, 7)));
    }

    #[test]
    fn test_find_port() {
        let text = b"1.2.3.4:5060;x";
        assert_eq!(find_port(text, 7, text.len()), Some((8, 4)));
        assert_eq!(find_port(b"1.2.3.4;x", 7, 9), None);
        assert_eq!(find_port(b"1.2.3.4:", 7, 8), None);
        assert_eq!(find_port(b"1.2.3.4:0", 7, 9), None);
    }
}
