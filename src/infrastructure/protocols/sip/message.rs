//! SIP message framing
//!
//! Reassembles SIP messages from a byte stream without parsing the full
//! grammar. Only the start line and the handful of headers the relay rewrites
//! are located; everything else passes through as opaque bytes.

use super::buffer::Buffer;
use crate::domain::shared::{ProxyError, Result};

/// Longest accepted header line, and half the buffering limit
pub const MAX_MESSAGE_LEN: usize = 6 * 1024;

/// Bytes that may be buffered for one stream at any time
pub const MAX_BUFFERED_LEN: usize = 2 * MAX_MESSAGE_LEN;

const SIP_VERSION_PREFIX: &[u8] = b"SIP/2.0 ";
const SIP_VERSION_SUFFIX: &[u8] = b" SIP/2.0";

/// Framing state of the message at the front of the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// Nothing buffered
    #[default]
    Initial,
    /// A framing error was reported; the stream is unusable
    Error,
    /// Waiting for more header or body bytes
    Incomplete,
    /// A complete message is available
    Ready,
}

/// Byte range inside the message buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.end()
    }

    /// Follow an edit of `delta` bytes made at absolute offset `at`.
    pub(crate) fn adjust(&mut self, at: usize, delta: isize) {
        if at < self.offset {
            self.offset = self.offset.saturating_add_signed(delta);
        } else if at < self.end() {
            self.len = self.len.saturating_add_signed(delta);
        }
    }
}

/// Located header spans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    /// Whole `Via` line, name included
    pub via_line: Option<Span>,
    pub via: Option<Span>,
    pub from: Option<Span>,
    pub to: Option<Span>,
    /// First `Contact` value
    pub contact: Option<Span>,
    /// Digits of the `Content-Length` value
    pub content_length: Option<Span>,
}

impl HeaderFields {
    pub(crate) fn spans_mut(&mut self) -> impl Iterator<Item = &mut Span> {
        [
            &mut self.via_line,
            &mut self.via,
            &mut self.from,
            &mut self.to,
            &mut self.contact,
            &mut self.content_length,
        ]
        .into_iter()
        .flatten()
    }
}

/// One in-flight SIP message over a reusable stream buffer
#[derive(Debug, Default)]
pub struct Message {
    pub(crate) buf: Buffer,
    state: FrameState,
    /// Zero until the empty line closing the header has been seen
    pub(crate) header_len: usize,
    pub(crate) body_len: usize,
    method_len: usize,
    line: Span,
    pub(crate) fields: HeaderFields,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == FrameState::Ready
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn body_len(&self) -> usize {
        self.body_len
    }

    pub fn method_len(&self) -> usize {
        self.method_len
    }

    /// Method name of a request, empty for a response
    pub fn method(&self) -> &[u8] {
        &self.buf.as_slice()[..self.method_len]
    }

    pub fn is_request(&self) -> bool {
        self.method_len > 0
    }

    pub fn fields(&self) -> &HeaderFields {
        &self.fields
    }

    /// All buffered bytes, including any pipelined follow-up
    pub fn buffered(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// The complete message; only meaningful while ready
    pub fn as_bytes(&self) -> &[u8] {
        let len = (self.header_len + self.body_len).min(self.buf.len());
        &self.buf.as_slice()[..len]
    }

    pub fn header(&self) -> &[u8] {
        &self.buf.as_slice()[..self.header_len]
    }

    pub fn body(&self) -> &[u8] {
        &self.buf.as_slice()[self.header_len..self.header_len + self.body_len]
    }

    pub fn span_bytes(&self, span: Span) -> &[u8] {
        &self.buf.as_slice()[span.range()]
    }

    /// Append received bytes and advance framing.
    ///
    /// A message that was ready is consumed first, so a stream can be fed
    /// without an explicit [`Message::consume`]. Feeding no bytes rescans what
    /// is already buffered.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<FrameState> {
        if self.state == FrameState::Ready {
            self.consume();
        }

        let result = self.feed_inner(bytes);
        if result.is_err() {
            self.state = FrameState::Error;
        }
        result
    }

    fn feed_inner(&mut self, bytes: &[u8]) -> Result<FrameState> {
        let total = self.buf.len() + bytes.len();
        if total > MAX_BUFFERED_LEN {
            return Err(ProxyError::ResourceExhausted { size: total });
        }
        self.buf.append(bytes)?;

        self.state = if self.header_len == 0 {
            self.scan_header()?
        } else {
            self.body_state()
        };
        Ok(self.state)
    }

    /// Drop a ready message from the front of the buffer and reset spans.
    pub fn consume(&mut self) {
        if self.state != FrameState::Ready {
            return;
        }

        self.buf.discard_front(self.header_len + self.body_len);
        self.reset();
        self.state = if self.buf.is_empty() {
            FrameState::Initial
        } else {
            FrameState::Incomplete
        };
    }

    fn reset(&mut self) {
        self.header_len = 0;
        self.body_len = 0;
        self.method_len = 0;
        self.line = Span::default();
        self.fields = HeaderFields::default();
    }

    fn body_state(&self) -> FrameState {
        if self.buf.len() >= self.header_len + self.body_len {
            FrameState::Ready
        } else {
            FrameState::Incomplete
        }
    }

    fn scan_header(&mut self) -> Result<FrameState> {
        let mut pos = self.line.end();

        loop {
            let data = self.buf.as_slice();
            let stop = data[pos..]
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
                .map_or(data.len(), |i| pos + i);
            self.line.len += stop - pos;
            pos = stop;

            if self.line.len > MAX_MESSAGE_LEN {
                return Err(ProxyError::malformed(format!(
                    "header line too long ({} bytes)",
                    self.line.len
                )));
            }
            if pos == data.len() {
                break;
            }

            if data[pos] == b'\r' {
                pos += 1;
                if pos == data.len() {
                    break;
                }
                if data[pos] != b'\n' {
                    return Err(ProxyError::malformed("header line not terminated"));
                }
            }
            pos += 1;

            if self.line.len == 0 {
                if self.line.offset == 0 {
                    // keep-alive
                    self.buf.discard_front(pos);
                    self.reset();
                    pos = 0;
                    continue;
                }
                return self.finish_header(pos);
            }

            if self.line.offset == 0 {
                self.parse_start_line()?;
            } else {
                self.parse_header_line()?;
            }
            self.line = Span::new(pos, 0);
        }

        Ok(if self.buf.is_empty() {
            FrameState::Initial
        } else {
            FrameState::Incomplete
        })
    }

    fn finish_header(&mut self, header_len: usize) -> Result<FrameState> {
        let missing: Vec<&str> = [
            ("Via", self.fields.via.is_none()),
            ("From", self.fields.from.is_none()),
            ("To", self.fields.to.is_none()),
            ("Content-Length", self.fields.content_length.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(ProxyError::malformed(format!(
                "missing {} header",
                missing.join(", ")
            )));
        }

        self.header_len = header_len;
        Ok(self.body_state())
    }

    fn parse_start_line(&mut self) -> Result<()> {
        let line = &self.buf.as_slice()[..self.line.len];
        let unrecognized = || ProxyError::malformed("SIP method or status not recognized");

        if line.len() <= SIP_VERSION_PREFIX.len() {
            return Err(unrecognized());
        }
        if line[..SIP_VERSION_PREFIX.len()].eq_ignore_ascii_case(SIP_VERSION_PREFIX) {
            return Ok(());
        }
        if !line[line.len() - SIP_VERSION_SUFFIX.len()..].eq_ignore_ascii_case(SIP_VERSION_SUFFIX) {
            return Err(unrecognized());
        }

        let method_len = line.iter().take_while(|b| b.is_ascii_alphabetic()).count();
        if method_len == 0 || method_len == line.len() || line[method_len] != b' ' {
            return Err(unrecognized());
        }

        self.method_len = method_len;
        Ok(())
    }

    fn parse_header_line(&mut self) -> Result<()> {
        let line_span = self.line;
        let line = &self.buf.as_slice()[line_span.range()];

        let name_len = line
            .iter()
            .take_while(|&&b| b.is_ascii_alphabetic() || b == b'-')
            .count();
        if name_len == 0 || name_len == line.len() || line[name_len] != b':' {
            return Err(ProxyError::malformed("SIP header not recognized"));
        }

        let value_at = name_len
            + 1
            + line[name_len + 1..]
                .iter()
                .take_while(|&&b| b == b' ')
                .count();
        if value_at == line.len() {
            return Err(ProxyError::malformed("SIP header not recognized"));
        }

        let name = &line[..name_len];
        let value = Span::new(line_span.offset + value_at, line.len() - value_at);
        let duplicate = |name: &str| ProxyError::malformed(format!("duplicate {} header", name));

        if name.eq_ignore_ascii_case(b"Via") {
            if self.fields.via.is_some() {
                return Err(duplicate("Via"));
            }
            self.fields.via_line = Some(line_span);
            self.fields.via = Some(value);
        } else if name.eq_ignore_ascii_case(b"From") {
            if self.fields.from.is_some() {
                return Err(duplicate("From"));
            }
            self.fields.from = Some(value);
        } else if name.eq_ignore_ascii_case(b"To") {
            if self.fields.to.is_some() {
                return Err(duplicate("To"));
            }
            self.fields.to = Some(value);
        } else if name.eq_ignore_ascii_case(b"Contact") {
            if self.fields.contact.is_none() {
                self.fields.contact = Some(value);
            }
        } else if name.eq_ignore_ascii_case(b"Content-Length") {
            if self.fields.content_length.is_some() {
                return Err(duplicate("Content-Length"));
            }
            self.body_len = parse_content_length(&line[value_at..])?;
            self.fields.content_length = Some(value);
        }

        Ok(())
    }
}

/// Decimal body length, bounded by what could ever be buffered.
fn parse_content_length(digits: &[u8]) -> Result<usize> {
    let invalid = || ProxyError::malformed("Content-Length header not recognized");

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    digits.iter().try_fold(0usize, |acc, &b| {
        let value = acc * 10 + usize::from(b - b'0');
        if value > MAX_BUFFERED_LEN {
            Err(invalid())
        } else {
            Ok(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER: &[u8] = b"REGISTER sip:x SIP/2.0\r\n\
Via: SIP/2.0/TCP 10.8.0.6:5060;rport;branch=z9hG4bK1\r\n\
From: <sip:abc@1.2.3.4:1111>;tag=1\r\n\
To: <sip:y>\r\n\
Contact: <sip:abc@1.2.3.4:1111>\r\n\
Content-Length: 0\r\n\
\r\n";

    fn ready(bytes: &[u8]) -> Message {
        let mut message = Message::new();
        assert_eq!(message.feed(bytes).unwrap(), FrameState::Ready);
        message
    }

    fn text(message: &Message, span: Option<Span>) -> &str {
        std::str::from_utf8(message.span_bytes(span.unwrap())).unwrap()
    }

    #[test]
    fn test_parse_request() {
        let message = ready(REGISTER);

        assert_eq!(message.method(), b"REGISTER");
        assert!(message.is_request());
        assert_eq!(message.header_len(), REGISTER.len());
        assert_eq!(message.body_len(), 0);

        let fields = message.fields();
        assert_eq!(
            text(&message, fields.via),
            "SIP/2.0/TCP 10.8.0.6:5060;rport;branch=z9hG4bK1"
        );
        assert!(text(&message, fields.via_line).starts_with("Via: "));
        assert_eq!(text(&message, fields.from), "<sip:abc@1.2.3.4:1111>;tag=1");
        assert_eq!(text(&message, fields.to), "<sip:y>");
        assert_eq!(text(&message, fields.contact), "<sip:abc@1.2.3.4:1111>");
        assert_eq!(text(&message, fields.content_length), "0");
    }

    #[test]
    fn test_parse_response_with_body() {
        let bytes = b"SIP/2.0 200 OK\nvia: SIP/2.0/UDP 1.1.1.1\nFROM: <sip:a@b>\nto: <sip:c@d>\ncontent-length: 4\n\nv=0\nNEXT";
        let mut message = Message::new();
        assert_eq!(message.feed(bytes).unwrap(), FrameState::Ready);
        assert!(!message.is_request());
        assert_eq!(message.body(), b"v=0\n");
        assert_eq!(message.buffered().len(), bytes.len());
    }

    #[test]
    fn test_split_feed_matches_single_feed() {
        let whole = ready(REGISTER);

        for split in 1..REGISTER.len() {
            let mut message = Message::new();
            assert_eq!(
                message.feed(&REGISTER[..split]).unwrap(),
                FrameState::Incomplete
            );
            assert_eq!(
                message.feed(&REGISTER[split..]).unwrap(),
                FrameState::Ready,
                "split at {}",
                split
            );
            assert_eq!(message.fields(), whole.fields());
            assert_eq!(message.header_len(), whole.header_len());
            assert_eq!(message.method_len(), whole.method_len());
        }
    }

    #[test]
    fn test_body_arrives_later() {
        let mut message = Message::new();
        let header = b"INVITE sip:b SIP/2.0\r\nVia: x\r\nFrom: a\r\nTo: b\r\nContent-Length: 5\r\n\r\n";
        assert_eq!(message.feed(header).unwrap(), FrameState::Incomplete);
        assert_eq!(message.feed(b"ab").unwrap(), FrameState::Incomplete);
        assert_eq!(message.feed(b"cde").unwrap(), FrameState::Ready);
        assert_eq!(message.body(), b"abcde");
    }

    #[test]
    fn test_pipelined_messages() {
        let mut stream = REGISTER.to_vec();
        stream.extend_from_slice(REGISTER);

        let mut message = Message::new();
        assert_eq!(message.feed(&stream).unwrap(), FrameState::Ready);
        assert_eq!(message.as_bytes(), REGISTER);

        message.consume();
        assert_eq!(message.state(), FrameState::Incomplete);
        assert_eq!(message.feed(&[]).unwrap(), FrameState::Ready);
        assert_eq!(message.as_bytes(), REGISTER);

        message.consume();
        assert_eq!(message.state(), FrameState::Initial);
    }

    #[test]
    fn test_keep_alive_is_discarded() {
        let mut message = Message::new();
        assert_eq!(message.feed(b"\r\n\r\n").unwrap(), FrameState::Initial);
        assert!(message.buffered().is_empty());

        let mut stream = b"\r\n".to_vec();
        stream.extend_from_slice(REGISTER);
        assert_eq!(message.feed(&stream).unwrap(), FrameState::Ready);
        assert_eq!(message.method(), b"REGISTER");
    }

    #[test]
    fn test_rejects_bad_start_line() {
        for bytes in [
            &b"HELLO WORLD\r\n"[..],
            b"REG1STER sip:x SIP/2.0\r\n",
            b" sip:x SIP/2.0\r\n",
            b"SIP/2.0 \r\n",
        ] {
            let mut message = Message::new();
            assert!(message.feed(bytes).unwrap_err().is_malformed());
            assert_eq!(message.state(), FrameState::Error);
        }
    }

    #[test]
    fn test_rejects_bad_header_lines() {
        for line in [
            &b"Via x\r\n"[..],
            b"Via:\r\n",
            b"Via:   \r\n",
            b": value\r\n",
            b"Content-Length: 1x\r\n",
            b"Content-Length: -1\r\n",
        ] {
            let mut bytes = b"OPTIONS sip:x SIP/2.0\r\n".to_vec();
            bytes.extend_from_slice(line);
            let mut message = Message::new();
            assert!(message.feed(&bytes).is_err(), "{:?}", line);
        }
    }

    #[test]
    fn test_rejects_duplicate_headers() {
        let bytes = b"OPTIONS sip:x SIP/2.0\r\nTo: a\r\nto: b\r\n";
        let err = Message::new().feed(bytes).unwrap_err();
        assert_eq!(err.to_string(), "Malformed message: duplicate To header");
    }

    #[test]
    fn test_keeps_first_contact() {
        let bytes = b"OPTIONS sip:x SIP/2.0\r\nVia: v\r\nFrom: f\r\nTo: t\r\nContact: <sip:one@1.1.1.1:1>\r\nContact: <sip:two@2.2.2.2:2>\r\nContent-Length: 0\r\n\r\n";
        let message = ready(bytes);
        assert_eq!(text(&message, message.fields().contact), "<sip:one@1.1.1.1:1>");
    }

    #[test]
    fn test_rejects_missing_headers() {
        let bytes = b"OPTIONS sip:x SIP/2.0\r\nVia: v\r\nTo: t\r\n\r\n";
        let err = Message::new().feed(bytes).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Malformed message: missing From, Content-Length header"
        );
    }

    #[test]
    fn test_rejects_bare_carriage_return() {
        let err = Message::new().feed(b"OPTIONS sip:x SIP/2.0\rX").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_content_length_leading_zeros_and_bound() {
        let zeros = format!(
            "OPTIONS sip:x SIP/2.0\r\nVia: v\r\nFrom: f\r\nTo: t\r\nContent-Length: {}7\r\n\r\n",
            "0".repeat(40)
        );
        let mut message = Message::new();
        assert_eq!(
            message.feed(zeros.as_bytes()).unwrap(),
            FrameState::Incomplete
        );
        assert_eq!(message.body_len(), 7);

        let huge = b"OPTIONS sip:x SIP/2.0\r\nContent-Length: 99999999999999999999999\r\n";
        assert!(Message::new().feed(huge).unwrap_err().is_malformed());
    }

    #[test]
    fn test_rejects_oversized_stream() {
        let mut message = Message::new();
        let err = message.feed(&vec![b'a'; MAX_BUFFERED_LEN + 1]).unwrap_err();
        assert!(matches!(err, ProxyError::ResourceExhausted { .. }));
        assert_eq!(message.state(), FrameState::Error);
        assert!(message.buffered().is_empty());
    }

    #[test]
    fn test_rejects_overlong_line() {
        let mut message = Message::new();
        let err = message.feed(&vec![b'a'; MAX_MESSAGE_LEN + 1]).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Malformed message: header line too long ({} bytes)", MAX_MESSAGE_LEN + 1)
        );
    }
}
