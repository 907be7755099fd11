//! Decoder error types
//!
//! Every failure here is recoverable at the call site. A failed `load`
//! returns no object and releases whatever it had booked.

use thiserror::Error;

use crate::memory::ReadError;

/// Errors produced while decoding heap objects
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The value is a small integer or failure marker, not a heap object
    #[error("{value:#x}: not a heap object")]
    NotHeapPointer {
        /// The raw tagged value
        value: u64,
    },

    /// The object's type tag is not one the decoder accepts
    #[error("{address:#x}: not a {expected} (type {found:#04x})")]
    WrongTypeTag {
        /// Object address
        address: u64,
        /// What the decoder was looking for
        expected: &'static str,
        /// The type byte read from the object's map
        found: u8,
    },

    /// A string whose representation bits match none of the known kinds
    #[error("{address:#x}: unsupported string representation (type {type_tag:#04x})")]
    UnsupportedRepresentation {
        /// Object address
        address: u64,
        /// The string's type byte
        type_tag: u8,
    },

    /// An array-backed object is shorter than its layout requires, or its
    /// header slots hold nonsense
    #[error("{address:#x}: {reason}")]
    ShortOrCorruptArray {
        /// Object address
        address: u64,
        /// What was wrong
        reason: String,
    },

    /// A scalar field holds a value that cannot be right (e.g. a negative
    /// length, or a pointer where a small integer belongs)
    #[error("{address:#x}: corrupt {field}: {reason}")]
    CorruptField {
        /// Object address
        address: u64,
        /// `Class.field` of the offending field
        field: String,
        /// What was wrong
        reason: &'static str,
    },

    /// The memory collaborator could not supply the requested bytes
    #[error("failed to read {len} bytes at {address:#x}: {source}")]
    MemoryReadFailure {
        /// Target address of the read
        address: u64,
        /// Number of bytes requested
        len: usize,
        /// Underlying read error
        #[source]
        source: ReadError,
    },

    /// The memory budget refused an allocation
    #[error("failed to allocate {size} bytes")]
    AllocationFailure {
        /// Requested allocation size
        size: usize,
    },

    /// A layout entry the operation depends on is absent
    #[error("missing layout configuration: {0}")]
    MissingConfiguration(String),

    /// String decoding recursed past the depth limit
    #[error("maximum string depth exceeded at depth {depth}")]
    DepthExceeded {
        /// Depth at which decoding gave up
        depth: u32,
    },

    /// A slot index past the end of the addressed region
    #[error("index {index} is out of range ({len} slots)")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of slots available
        len: usize,
    },

    /// External string data that does not look like ASCII text
    #[error("{address:#x}: external string data is not ASCII")]
    NonAsciiExternalData {
        /// Tagged string address
        address: u64,
    },
}

impl DecodeError {
    /// Create a missing-configuration error for `class.field`
    pub fn missing(class: &str, field: &str) -> Self {
        Self::MissingConfiguration(format!("{class}.{field}"))
    }

    /// Create a short-or-corrupt array error
    pub fn corrupt_array(address: u64, reason: impl Into<String>) -> Self {
        Self::ShortOrCorruptArray {
            address,
            reason: reason.into(),
        }
    }
}

/// Result type for decoder operations
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
