//! Tagged values
//!
//! Every slot in the V8 heap is an address-sized word whose low bits say what
//! it is:
//!
//! ```text
//! ...xxxxxxx0   small integer (value in the upper bits)
//! ...xxxxxx01   heap object pointer (address = word - 1)
//! ...xxxxxx11   failure marker (older V8 builds only)
//! ```
//!
//! The exact masks and shifts differ between builds and word sizes, so they
//! come from a [`TagLayout`] rather than constants. Nothing in this module
//! touches target memory.

use serde::{Deserialize, Serialize};

/// A raw word read from the target
///
/// Words from 32-bit targets are zero-extended.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaggedValue(u64);

impl TaggedValue {
    /// Wrap a raw word
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw word
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::LowerHex for TaggedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// What a tagged word turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggedKind {
    /// Inline integer, no heap access needed
    SmallInt(i64),
    /// Failure sentinel (or a word that is neither SMI nor heap pointer)
    Failure,
    /// Pointer to a heap object
    HeapPointer {
        /// Untagged address of the object
        address: u64,
        /// The tag bits that were stripped
        tag: u64,
    },
}

/// Tag masks and shifts for one V8 build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLayout {
    /// Target word size in bytes (4 or 8)
    pub pointer_size: usize,
    /// `kHeapObjectTag`
    pub heap_object_tag: u64,
    /// `kHeapObjectTagMask`
    pub heap_object_tag_mask: u64,
    /// `kSmiTag`
    pub smi_tag: u64,
    /// `kSmiTagMask`
    pub smi_tag_mask: u64,
    /// `kSmiTagSize`: bits below the SMI payload
    pub smi_value_shift: u32,
    /// `kSmiShiftSize`: extra padding bits on 64-bit targets
    pub smi_shift_size: u32,
    /// `kFailureTag`, absent on builds without failure markers
    #[serde(default)]
    pub failure_tag: Option<u64>,
    /// `kFailureTagMask`
    #[serde(default)]
    pub failure_tag_mask: Option<u64>,
}

impl TagLayout {
    /// Number of value bits in a target word
    #[inline]
    pub fn word_bits(&self) -> u32 {
        (self.pointer_size as u32).saturating_mul(8).min(64)
    }

    #[inline]
    fn word_mask(&self) -> u64 {
        match self.word_bits() {
            64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    #[inline]
    fn smi_shift(&self) -> u32 {
        self.smi_value_shift.saturating_add(self.smi_shift_size)
    }

    /// Is this word a small integer?
    #[inline]
    pub fn is_smi(&self, value: TaggedValue) -> bool {
        value.raw() & self.smi_tag_mask == self.smi_tag
    }

    /// Is this word a heap object pointer?
    #[inline]
    pub fn is_heap_object(&self, value: TaggedValue) -> bool {
        value.raw() & self.heap_object_tag_mask == self.heap_object_tag
    }

    /// Is this word a failure marker?
    #[inline]
    pub fn is_failure(&self, value: TaggedValue) -> bool {
        match (self.failure_tag, self.failure_tag_mask) {
            (Some(tag), Some(mask)) => value.raw() & mask == tag,
            _ => false,
        }
    }

    /// Classify a word. SMI wins over heap pointer, heap pointer over failure.
    pub fn classify(&self, value: TaggedValue) -> TaggedKind {
        if self.is_smi(value) {
            TaggedKind::SmallInt(self.to_small_int(value))
        } else if self.is_heap_object(value) {
            TaggedKind::HeapPointer {
                address: value.raw().wrapping_sub(self.heap_object_tag),
                tag: self.heap_object_tag,
            }
        } else {
            TaggedKind::Failure
        }
    }

    /// Untagged address of a heap pointer, or `None` for anything else
    #[inline]
    pub fn heap_address(&self, value: TaggedValue) -> Option<u64> {
        match self.classify(value) {
            TaggedKind::HeapPointer { address, .. } => Some(address),
            _ => None,
        }
    }

    /// Decode the integer held in an SMI word. The word is not checked.
    pub fn to_small_int(&self, value: TaggedValue) -> i64 {
        let signed = match self.word_bits() {
            32 => value.raw() as u32 as i32 as i64,
            _ => value.raw() as i64,
        };
        // shifting by the full width or more leaves only the sign
        signed.checked_shr(self.smi_shift()).unwrap_or(signed >> 63)
    }

    /// Encode an integer as an SMI word
    ///
    /// Exact for every value in [`TagLayout::smi_range`]; values outside it
    /// lose their high bits.
    pub fn from_small_int(&self, value: i64) -> TaggedValue {
        let shifted = (value as u64).checked_shl(self.smi_shift()).unwrap_or(0);
        TaggedValue::from_raw((shifted | self.smi_tag) & self.word_mask())
    }

    /// Inclusive range of integers an SMI can hold on this target
    pub fn smi_range(&self) -> (i64, i64) {
        let bits = self.word_bits().saturating_sub(self.smi_shift());
        match bits {
            0 => (0, 0),
            64.. => (i64::MIN, i64::MAX),
            bits => (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x64() -> TagLayout {
        TagLayout {
            pointer_size: 8,
            heap_object_tag: 1,
            heap_object_tag_mask: 3,
            smi_tag: 0,
            smi_tag_mask: 1,
            smi_value_shift: 1,
            smi_shift_size: 31,
            failure_tag: Some(3),
            failure_tag_mask: Some(3),
        }
    }

    fn ia32() -> TagLayout {
        TagLayout {
            pointer_size: 4,
            smi_shift_size: 0,
            failure_tag: None,
            failure_tag_mask: None,
            ..x64()
        }
    }

    #[test]
    fn test_classify_x64() {
        let tags = x64();
        assert_eq!(
            tags.classify(TaggedValue::from_raw(42 << 32)),
            TaggedKind::SmallInt(42)
        );
        assert_eq!(
            tags.classify(TaggedValue::from_raw(0x1000_0001)),
            TaggedKind::HeapPointer {
                address: 0x1000_0000,
                tag: 1
            }
        );
        assert_eq!(
            tags.classify(TaggedValue::from_raw(0x1000_0003)),
            TaggedKind::Failure
        );
    }

    #[test]
    fn test_negative_smi_ia32() {
        let tags = ia32();
        let raw = tags.from_small_int(-5);
        assert_eq!(raw.raw(), 0xffff_fff6);
        assert_eq!(tags.classify(raw), TaggedKind::SmallInt(-5));
    }

    #[test]
    fn test_unmatched_word_is_failure_without_failure_tag() {
        let tags = ia32();
        assert_eq!(
            tags.classify(TaggedValue::from_raw(0x0b)),
            TaggedKind::Failure
        );
        assert!(!tags.is_failure(TaggedValue::from_raw(0x0b)));
    }

    #[test]
    fn test_smi_range() {
        assert_eq!(x64().smi_range(), (i32::MIN as i64, i32::MAX as i64));
        assert_eq!(ia32().smi_range(), (-(1 << 30), (1 << 30) - 1));
    }

    #[test]
    fn test_oversized_shift_does_not_panic() {
        let tags = TagLayout {
            smi_shift_size: 200,
            ..x64()
        };
        assert_eq!(tags.from_small_int(7).raw(), 0);
        assert_eq!(tags.to_small_int(TaggedValue::from_raw(u64::MAX)), -1);
    }
}
