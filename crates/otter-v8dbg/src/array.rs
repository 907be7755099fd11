//! FixedArray and JSArray
//!
//! A FixedArray is an SMI length followed by that many tagged slots. Context
//! and ScopeInfo objects are FixedArrays underneath (or are laid out like
//! one on builds that give them their own type), so their loaders start here.

use std::ops::ControlFlow;

use crate::alloc::{AllocPolicy, Reservation};
use crate::error::{DecodeError, DecodeResult};
use crate::heap::HeapInspector;
use crate::tagged::TaggedValue;

/// Length-prefixed array of tagged slots, copied out of the target
#[derive(Debug)]
pub struct FixedArray {
    address: u64,
    slots: Vec<TaggedValue>,
    _reservation: Reservation,
}

impl FixedArray {
    /// Load the FixedArray that `value` points to
    pub fn load(heap: &HeapInspector<'_>, value: TaggedValue, policy: AllocPolicy) -> DecodeResult<Self> {
        Self::load_as(heap, value, "FixedArray", None, policy)
    }

    /// Load an array-shaped object, also accepting `alt_type` as its type byte
    pub(crate) fn load_as(
        heap: &HeapInspector<'_>,
        value: TaggedValue,
        expected: &'static str,
        alt_type: Option<u8>,
        policy: AllocPolicy,
    ) -> DecodeResult<Self> {
        let types = &heap.layout().types;
        let (address, _) = heap.expect_type(value, expected, &[types.fixed_array, alt_type])?;

        let length = heap.read_smi(address, "FixedArray", "length")?;
        let length = usize::try_from(length).map_err(|_| {
            tracing::warn!(object = format_args!("{address:#x}"), length, "negative array length");
            DecodeError::corrupt_array(address, format!("negative array length {length}"))
        })?;

        let data = heap.field_address(address, "FixedArray", "data")?;
        let (slots, reservation) = heap.read_slots(data, length, policy).inspect_err(|err| {
            tracing::warn!(
                object = format_args!("{address:#x}"),
                length,
                "failed to read array contents: {err}"
            );
        })?;

        Ok(Self {
            address,
            slots,
            _reservation: reservation,
        })
    }

    /// Untagged address of the array
    #[inline]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the array has no slots
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot at `index`
    #[inline]
    pub fn get(&self, index: usize) -> Option<TaggedValue> {
        self.slots.get(index).copied()
    }

    /// All slots
    #[inline]
    pub fn slots(&self) -> &[TaggedValue] {
        &self.slots
    }
}

/// A JavaScript array: a length plus a FixedArray backing store
#[derive(Debug)]
pub struct JsArray {
    address: u64,
    length: usize,
    elements: Option<FixedArray>,
}

impl JsArray {
    /// Load the JSArray that `value` points to
    pub fn load(heap: &HeapInspector<'_>, value: TaggedValue, policy: AllocPolicy) -> DecodeResult<Self> {
        let types = &heap.layout().types;
        let (address, _) = heap.expect_type(value, "JSArray", &[types.js_array])?;

        let length = heap.read_smi(address, "JSArray", "length")?;
        let length = usize::try_from(length)
            .map_err(|_| DecodeError::corrupt_array(address, format!("negative array length {length}")))?;

        let elements = if length > 0 {
            let store = heap.read_ptr(address, "JSObject", "elements")?;
            Some(FixedArray::load(heap, store, policy)?)
        } else {
            None
        };

        Ok(Self {
            address,
            length,
            elements,
        })
    }

    /// Untagged address of the array object
    pub fn address(&self) -> u64 {
        self.address
    }

    /// JavaScript `length`
    pub fn length(&self) -> usize {
        self.length
    }

    /// Elements in index order, at most `length` of them
    ///
    /// The backing store may be longer than the array (spare capacity) or,
    /// for a corrupt object, shorter.
    pub fn elements(&self) -> impl Iterator<Item = TaggedValue> + '_ {
        self.elements
            .iter()
            .flat_map(|store| store.slots().iter().copied())
            .take(self.length)
    }

    /// Visit each element with its index until the visitor breaks
    pub fn visit_elements<B>(&self, mut visit: impl FnMut(usize, TaggedValue) -> ControlFlow<B>) -> ControlFlow<B> {
        for (index, value) in self.elements().enumerate() {
            visit(index, value)?;
        }
        ControlFlow::Continue(())
    }
}
