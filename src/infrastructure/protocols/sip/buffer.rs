//! Growable byte store backing one endpoint's message stream

use crate::domain::shared::{ProxyError, Result};
use bytes::BytesMut;

/// Allocation granularity
pub const RESIZE_INCREMENT: usize = 1024;

/// Hard ceiling for a single buffer
pub const MAX_CAPACITY: usize = 65535;

/// Byte buffer with a used length and a capped, incrementally grown allocation
#[derive(Debug, Default)]
pub struct Buffer {
    data: BytesMut,
    allocated: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Used length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes accounted as allocated, always a multiple of [`RESIZE_INCREMENT`]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Ensure room for `size` used bytes in total.
    pub fn reserve_total(&mut self, size: usize) -> Result<()> {
        if size <= self.allocated {
            return Ok(());
        }

        let allocate = size.div_ceil(RESIZE_INCREMENT) * RESIZE_INCREMENT;
        if allocate > MAX_CAPACITY {
            return Err(ProxyError::ResourceExhausted { size: allocate });
        }

        self.data.reserve(allocate - self.data.len());
        self.allocated = allocate;
        Ok(())
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve_total(self.data.len() + bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Replace `remove_len` bytes at `at` with `with`, shifting the tail.
    ///
    /// On failure the buffer is left untouched.
    pub fn splice(&mut self, at: usize, remove_len: usize, with: &[u8]) -> Result<()> {
        let old_len = self.data.len();
        debug_assert!(at + remove_len <= old_len);

        let new_len = old_len - remove_len + with.len();
        self.reserve_total(new_len)?;

        let tail = at + remove_len..old_len;
        let tail_to = at + with.len();
        if new_len > old_len {
            self.data.resize(new_len, 0);
            self.data.copy_within(tail, tail_to);
        } else {
            self.data.copy_within(tail, tail_to);
            self.data.truncate(new_len);
        }

        self.data[at..at + with.len()].copy_from_slice(with);
        Ok(())
    }

    /// Drop the first `len` bytes, moving the remainder to offset 0.
    ///
    /// The allocation is kept, so [`Buffer::allocated`] stays accurate.
    pub fn discard_front(&mut self, len: usize) {
        let len = len.min(self.data.len());
        self.data.copy_within(len.., 0);
        self.data.truncate(self.data.len() - len);
    }
}
