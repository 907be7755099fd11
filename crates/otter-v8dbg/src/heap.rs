//! Heap access layer
//!
//! [`HeapInspector`] bundles the three things every decoder needs: the
//! target memory, the layout of the V8 build that produced it, and the
//! budget that loaded objects are booked against. All field reads go through
//! here so that address arithmetic is checked in one place.
//!
//! Addresses taken by these methods are untagged object addresses; offsets
//! from the layout are relative to the start of the object.

use std::sync::Arc;

use crate::alloc::{AllocPolicy, MemoryBudget, Reservation};
use crate::config::Layout;
use crate::error::{DecodeError, DecodeResult};
use crate::memory::TargetMemory;
use crate::tagged::{TagLayout, TaggedKind, TaggedValue};

/// Handle for decoding objects out of one target
pub struct HeapInspector<'m> {
    memory: &'m dyn TargetMemory,
    layout: Layout,
    budget: Arc<MemoryBudget>,
}

impl<'m> HeapInspector<'m> {
    /// Create an inspector with a budget sized from the layout's limits
    pub fn new(memory: &'m dyn TargetMemory, layout: Layout) -> Self {
        let budget = MemoryBudget::from_limits(&layout.limits);
        Self::with_budget(memory, layout, budget)
    }

    /// Create an inspector that books against an existing budget
    pub fn with_budget(memory: &'m dyn TargetMemory, layout: Layout, budget: Arc<MemoryBudget>) -> Self {
        Self {
            memory,
            layout,
            budget,
        }
    }

    /// Layout in use
    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Tagging scheme in use
    #[inline]
    pub fn tags(&self) -> &TagLayout {
        &self.layout.tags
    }

    /// Budget that loads book against
    #[inline]
    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    /// Classify a tagged word
    #[inline]
    pub fn classify(&self, value: TaggedValue) -> TaggedKind {
        self.layout.tags.classify(value)
    }

    /// Untagged address of a heap pointer
    pub fn heap_address(&self, value: TaggedValue) -> DecodeResult<u64> {
        self.layout
            .tags
            .heap_address(value)
            .ok_or(DecodeError::NotHeapPointer { value: value.raw() })
    }

    // ========================================================================
    // Raw reads
    // ========================================================================

    /// Fill `buf` from target memory
    pub fn read_bytes(&self, address: u64, buf: &mut [u8]) -> DecodeResult<()> {
        self.memory
            .read(address, buf)
            .map_err(|source| DecodeError::MemoryReadFailure {
                address,
                len: buf.len(),
                source,
            })
    }

    #[inline]
    fn word_size(&self) -> usize {
        self.layout.tags.pointer_size.clamp(1, 8)
    }

    /// Read one target word
    pub fn read_word(&self, address: u64) -> DecodeResult<TaggedValue> {
        let size = self.word_size();
        let mut bytes = [0u8; 8];
        self.read_bytes(address, &mut bytes[..size])?;
        Ok(TaggedValue::from_raw(u64::from_le_bytes(bytes)))
    }

    /// Read `count` consecutive words with a single memory read
    pub fn read_slots(
        &self,
        address: u64,
        count: usize,
        policy: AllocPolicy,
    ) -> DecodeResult<(Vec<TaggedValue>, Reservation)> {
        let size = self.word_size();
        let byte_len = count
            .checked_mul(size)
            .ok_or(DecodeError::AllocationFailure { size: usize::MAX })?;

        // the raw bytes are only held until they are converted
        let (mut raw, _scratch) = self.budget.allocate_vec::<u8>(byte_len, policy)?;
        raw.resize(byte_len, 0);
        self.read_bytes(address, &mut raw)?;

        let (mut slots, reservation) = self.budget.allocate_vec::<TaggedValue>(count, policy)?;
        slots.extend(raw.chunks_exact(size).map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes[..size].copy_from_slice(chunk);
            TaggedValue::from_raw(u64::from_le_bytes(bytes))
        }));
        Ok((slots, reservation))
    }

    // ========================================================================
    // Field reads
    // ========================================================================

    /// Address of `class.field` within the object at `object`
    pub fn field_address(&self, object: u64, class: &str, field: &str) -> DecodeResult<u64> {
        let offset = self.layout.offset(class, field)?;
        object
            .checked_add(offset)
            .ok_or_else(|| DecodeError::CorruptField {
                address: object,
                field: format!("{class}.{field}"),
                reason: "field address overflows",
            })
    }

    /// Read the word stored in `class.field`
    pub fn read_ptr(&self, object: u64, class: &str, field: &str) -> DecodeResult<TaggedValue> {
        let address = self.field_address(object, class, field)?;
        self.read_word(address).inspect_err(|err| {
            tracing::warn!(
                object = format_args!("{object:#x}"),
                "failed to read {class}.{field}: {err}"
            );
        })
    }

    /// Read `class.field`, which must hold an SMI
    pub fn read_smi(&self, object: u64, class: &str, field: &str) -> DecodeResult<i64> {
        let value = self.read_ptr(object, class, field)?;
        match self.classify(value) {
            TaggedKind::SmallInt(n) => Ok(n),
            _ => {
                tracing::warn!(
                    object = format_args!("{object:#x}"),
                    value = format_args!("{value:#x}"),
                    "{class}.{field}: expected SMI"
                );
                Err(DecodeError::CorruptField {
                    address: object,
                    field: format!("{class}.{field}"),
                    reason: "expected a small integer",
                })
            }
        }
    }

    /// Read `class.field`, which some builds store as an SMI and others as a
    /// plain integer
    pub fn read_maybe_smi(&self, object: u64, class: &str, field: &str) -> DecodeResult<i64> {
        let value = self.read_ptr(object, class, field)?;
        Ok(match self.classify(value) {
            TaggedKind::SmallInt(n) => n,
            _ => value.raw() as i64,
        })
    }

    /// Read an object's instance type byte through its map
    pub fn read_type_byte(&self, object: u64) -> DecodeResult<u8> {
        let map = self.read_ptr(object, "HeapObject", "map")?;
        let map = self.heap_address(map).inspect_err(|_| {
            tracing::warn!(object = format_args!("{object:#x}"), "map is not a heap object");
        })?;
        let address = self.field_address(map, "Map", "instance_attributes")?;
        let mut byte = [0u8; 1];
        self.read_bytes(address, &mut byte).inspect_err(|err| {
            tracing::warn!(object = format_args!("{object:#x}"), "failed to read type: {err}");
        })?;
        Ok(byte[0])
    }

    /// Resolve `value` to a heap object and check its type byte
    ///
    /// Returns the untagged address and the type byte that was found.
    pub fn expect_type(
        &self,
        value: TaggedValue,
        expected: &'static str,
        accepted: &[Option<u8>],
    ) -> DecodeResult<(u64, u8)> {
        let address = self.heap_address(value)?;
        let found = self.read_type_byte(address)?;
        if !accepted.iter().flatten().any(|&t| t == found) {
            tracing::warn!(
                object = format_args!("{address:#x}"),
                "not a {expected} (type {found:#04x})"
            );
            return Err(DecodeError::WrongTypeTag {
                address,
                expected,
                found,
            });
        }
        Ok((address, found))
    }
}

impl std::fmt::Debug for HeapInspector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapInspector")
            .field("version", &self.layout.version)
            .field("pointer_size", &self.layout.tags.pointer_size)
            .field("allocated", &self.budget.allocated())
            .finish()
    }
}
