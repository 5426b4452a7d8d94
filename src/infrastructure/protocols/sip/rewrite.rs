//! Address and port rewriting
//!
//! Scans the header or body of a ready message for dotted-quad literals and
//! replaces them through [`Message::replace`]. Address filters compare the
//! literal text, so `010.0.0.1` never matches `10.0.0.1`.

use super::message::Message;
use super::splice::{Region, ScanWindow};
use crate::domain::shared::literal;
use crate::domain::shared::{AddrPort, ProxyError, Result};

impl Message {
    /// Leftmost address in the window as region-relative `(offset, length)`.
    pub fn find_address(&self, window: &ScanWindow) -> Option<(usize, usize)> {
        let base = self.region_base(window.region);
        literal::find_address(self.buffered(), base + window.cursor, base + window.end)
            .map(|(at, len)| (at - base, len))
    }

    /// Port directly following an address that ends at `addr_end`.
    pub fn find_port(&self, window: &ScanWindow, addr_end: usize) -> Option<(usize, usize)> {
        let base = self.region_base(window.region);
        literal::find_port(self.buffered(), base + addr_end, base + window.end)
            .map(|(at, len)| (at - base, len))
    }

    /// Replace every address in the window that matches `from` with `to`.
    ///
    /// Without a `from` filter every address is replaced. A port following a
    /// replaced address is replaced too when `to` carries one. Returns the
    /// number of addresses matched.
    pub fn rewrite_addresses(
        &mut self,
        window: &mut ScanWindow,
        from: Option<&AddrPort>,
        to: &AddrPort,
    ) -> Result<usize> {
        let mut matched = 0;

        while let Some((at, len)) = self.find_address(window) {
            window.cursor = at + len;

            let base = self.region_base(window.region);
            let found = &self.buffered()[base + at..base + at + len];
            if from.is_some_and(|from| !from.matches_address(found)) {
                continue;
            }

            self.replace(window, at, len, to.address().as_bytes())?;
            matched += 1;

            if !to.has_port() {
                continue;
            }
            if let Some((port_at, port_len)) = self.find_port(window, window.cursor) {
                window.cursor = port_at + port_len;
                self.replace(window, port_at, port_len, to.port().as_bytes())?;
            }
        }

        Ok(matched)
    }

    /// Rewrite addresses in the header, skipping the start line's method
    /// token and the whole `Via` line.
    pub fn rewrite_header_addresses(
        &mut self,
        from: Option<&AddrPort>,
        to: &AddrPort,
    ) -> Result<usize> {
        let via_line = self
            .fields
            .via_line
            .ok_or_else(|| ProxyError::malformed("missing Via header"))?;

        let mut window = ScanWindow::new(Region::Header, self.method_len(), via_line.offset);
        let mut matched = self.rewrite_addresses(&mut window, from, to)?;

        // The Via line may have moved with the edits above.
        let via_end = self.fields.via_line.map_or(via_line.end(), |span| span.end());
        let mut window = ScanWindow::new(Region::Header, via_end, self.header_len);
        matched += self.rewrite_addresses(&mut window, from, to)?;

        Ok(matched)
    }

    pub fn rewrite_body_addresses(
        &mut self,
        from: Option<&AddrPort>,
        to: &AddrPort,
    ) -> Result<usize> {
        if self.body_len == 0 {
            return Ok(0);
        }

        let mut window = ScanWindow::new(Region::Body, 0, self.body_len);
        self.rewrite_addresses(&mut window, from, to)
    }

    /// Rewrite the `Content-Length` value to the current body length.
    pub fn resync_content_length(&mut self) -> Result<()> {
        let span = self
            .fields
            .content_length
            .ok_or_else(|| ProxyError::malformed("missing Content-Length header"))?;

        let digits = self.body_len.to_string();
        let mut window = ScanWindow::new(Region::Header, span.end(), self.header_len);
        self.replace(&mut window, span.offset, span.len, digits.as_bytes())
    }

    /// First body address whose text matches none of `known`.
    pub fn first_foreign_body_address(&self, known: &[&AddrPort]) -> Option<AddrPort> {
        let mut window = ScanWindow::new(Region::Body, 0, self.body_len);

        while let Some((at, len)) = self.find_address(&window) {
            window.cursor = at + len;

            let found = &self.body()[at..at + len];
            if !known.iter().any(|addr| addr.matches_address(found)) {
                return AddrPort::address_only(found);
            }
        }

        None
    }
}
