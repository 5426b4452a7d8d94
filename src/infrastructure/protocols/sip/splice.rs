//! In-place byte replacement for a framed message
//!
//! Every edit that shifts bytes goes through [`Message::replace`], which keeps
//! the header/body lengths, all located header spans and the caller's scan
//! window consistent with the new buffer layout.

use super::message::Message;
use crate::domain::shared::Result;

/// Part of a message a scan window lies in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Header,
    Body,
}

/// Remaining unscanned bytes of a region
///
/// Offsets are relative to the start of the region. `cursor` is the next byte
/// to scan and `end` is one past the last byte of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub region: Region,
    pub cursor: usize,
    pub end: usize,
}

impl ScanWindow {
    pub fn new(region: Region, cursor: usize, end: usize) -> Self {
        Self {
            region,
            cursor,
            end,
        }
    }
}

impl Message {
    /// Absolute buffer offset of a region.
    pub fn region_base(&self, region: Region) -> usize {
        match region {
            Region::Header => 0,
            Region::Body => self.header_len,
        }
    }

    /// Replace `remove_len` bytes at region offset `at` with `with`.
    ///
    /// Spans that contain the edit point grow or shrink with it and spans
    /// after it move. The window's end always follows the edit; its cursor
    /// only moves when the replaced range lies wholly before it.
    pub fn replace(
        &mut self,
        window: &mut ScanWindow,
        at: usize,
        remove_len: usize,
        with: &[u8],
    ) -> Result<()> {
        let base = self.region_base(window.region);
        let absolute = base + at;

        if self.buf.as_slice()[absolute..absolute + remove_len] == *with {
            return Ok(());
        }

        self.buf.splice(absolute, remove_len, with)?;

        let delta = with.len() as isize - remove_len as isize;
        if delta == 0 {
            return Ok(());
        }

        match window.region {
            Region::Header => {
                self.header_len = self.header_len.saturating_add_signed(delta);
            }
            Region::Body => {
                self.body_len = self.body_len.saturating_add_signed(delta);
            }
        }

        for span in self.fields.spans_mut() {
            span.adjust(absolute, delta);
        }

        if at + remove_len <= window.cursor {
            window.cursor = window.cursor.saturating_add_signed(delta);
        }
        window.end = window.end.saturating_add_signed(delta);

        Ok(())
    }
}
