//! Message dumps

use crate::domain::session::{Protocol, Side};
use crate::domain::shared::AddrPort;
use std::fmt::Write;
use tracing::info;

/// Target message dumps are logged on
pub const DUMP_TARGET: &str = "fonbox_proxy::dump";

/// Printable rendering of a raw message.
///
/// `\r` and `\n` are shown as escapes, and every line break is kept so the
/// dump reads like the message. Other control and non-ASCII bytes become
/// `\xNN`.
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + bytes.len() / 8);

    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n\n"),
            b'\r' => out.push_str("\\r"),
            32..=127 => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }

    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Bytes shown when a message cannot be framed
pub const HEX_PREFIX_LEN: usize = 64;

/// Hex rendering of the first [`HEX_PREFIX_LEN`] bytes, 16 per line.
pub fn hex_prefix(bytes: &[u8]) -> String {
    bytes[..bytes.len().min(HEX_PREFIX_LEN)]
        .chunks(16)
        .map(|row| {
            row.iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn labelled(side: Option<Side>, addr: &AddrPort) -> String {
    match side {
        Some(side) => format!("{} {}", side.as_str(), addr),
        None => addr.to_string(),
    }
}

/// Log one message on the dump target.
pub fn log_message(
    protocol: Protocol,
    from: (Option<Side>, &AddrPort),
    to: (Option<Side>, &AddrPort),
    bytes: &[u8],
) {
    info!(
        target: DUMP_TARGET,
        "{} {} -> {} Size {}\n{}",
        protocol,
        labelled(from.0, from.1),
        labelled(to.0, to.1),
        bytes.len(),
        escape(bytes)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape(b"OPTIONS\r\nVia: x\r\n"), "OPTIONS\\r\\n\nVia: x\\r\\n");
        assert_eq!(escape(b"a\tb\xff"), "a\\x09b\\xff");
    }

    #[test]
    fn test_hex_prefix() {
        assert_eq!(hex_prefix(b"AB\r\n"), "41 42 0d 0a");
        assert_eq!(hex_prefix(&[0u8; 17]).lines().count(), 2);
        assert_eq!(hex_prefix(&[0xffu8; 200]).len(), 4 * (16 * 3 - 1) + 3);
    }

    #[test]
    fn test_labelled() {
        let addr = AddrPort::from_socket_addr("10.8.0.6:5060".parse().unwrap());
        assert_eq!(labelled(Some(Side::Fon), &addr), "Fon 10.8.0.6:5060");
        assert_eq!(labelled(None, &addr), "10.8.0.6:5060");
    }
}
