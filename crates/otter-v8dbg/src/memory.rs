//! Target memory access
//!
//! The decoder never owns the memory it inspects. It asks a [`TargetMemory`]
//! for byte ranges, which may come from a live process, a core file, or a
//! [`MemoryImage`] assembled in memory.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors from reading target memory
#[derive(Debug, Error)]
pub enum ReadError {
    /// Part of the range is not mapped
    #[error("{len} bytes at {address:#x} are not mapped")]
    Unmapped {
        /// First address of the range
        address: u64,
        /// Range length
        len: usize,
    },

    /// The range wraps past the end of the address space
    #[error("range at {address:#x} overflows the address space")]
    Overflow {
        /// First address of the range
        address: u64,
    },

    /// Backend I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Source of raw target bytes
///
/// A failed read must leave no side effects; the caller discards `buf`.
pub trait TargetMemory {
    /// Fill `buf` with the bytes at `address`
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), ReadError>;
}

impl<T: TargetMemory + ?Sized> TargetMemory for &T {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), ReadError> {
        (**self).read(address, buf)
    }
}

/// Sparse snapshot of target memory
///
/// Segments are keyed by base address. A read may span adjacent segments but
/// fails if any byte of it is unmapped.
#[derive(Debug, Default, Clone)]
pub struct MemoryImage {
    segments: BTreeMap<u64, Vec<u8>>,
}

impl MemoryImage {
    /// Create an empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `base`, replacing any segment with the same base
    pub fn map(&mut self, base: u64, bytes: Vec<u8>) {
        self.segments.insert(base, bytes);
    }

    /// Number of mapped segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total mapped bytes
    pub fn mapped_bytes(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    /// Segment containing `address`, with the offset into it
    fn locate(&self, address: u64) -> Option<(&[u8], usize)> {
        let (base, bytes) = self.segments.range(..=address).next_back()?;
        let offset = usize::try_from(address - base).ok()?;
        (offset < bytes.len()).then_some((bytes.as_slice(), offset))
    }
}

impl TargetMemory for MemoryImage {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), ReadError> {
        let len = buf.len();
        address
            .checked_add(len as u64)
            .ok_or(ReadError::Overflow { address })?;

        let mut filled = 0;
        while filled < len {
            let cursor = address + filled as u64;
            let (bytes, offset) = self
                .locate(cursor)
                .ok_or(ReadError::Unmapped { address, len })?;
            let n = (bytes.len() - offset).min(len - filled);
            buf[filled..filled + n].copy_from_slice(&bytes[offset..offset + n]);
            filled += n;
        }
        tracing::trace!(address = format_args!("{address:#x}"), len, "read");
        Ok(())
    }
}
