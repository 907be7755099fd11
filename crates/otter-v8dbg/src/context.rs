//! Context decoding
//!
//! A Context holds the variables a closure captured. It is laid out as a
//! FixedArray: a few static slots (closure, previous context, extension,
//! global object) followed by one dynamic slot per context-local variable.
//! The ScopeInfo of the closure names those dynamic slots.

use std::ops::ControlFlow;

use crate::alloc::AllocPolicy;
use crate::array::FixedArray;
use crate::config::required;
use crate::error::{DecodeError, DecodeResult};
use crate::function::JsFunction;
use crate::heap::HeapInspector;
use crate::scope_info::ScopeInfo;
use crate::tagged::TaggedValue;

/// Resolved static slot indices
#[derive(Debug, Clone, Copy)]
struct ContextSlots {
    closure: usize,
    previous: usize,
    extension: usize,
    global: usize,
    ncommon: usize,
}

impl ContextSlots {
    fn resolve(heap: &HeapInspector<'_>) -> DecodeResult<Self> {
        let ctx = &heap.layout().context;
        Ok(Self {
            closure: required(ctx.idx_closure, "context", "idx_closure")?,
            previous: required(ctx.idx_previous, "context", "idx_previous")?,
            extension: required(ctx.idx_extension, "context", "idx_extension")?,
            global: required(ctx.idx_global, "context", "idx_global")?,
            ncommon: required(ctx.ncommon, "context", "ncommon")?,
        })
    }

    /// Static slots in the order they are reported
    fn labelled(&self) -> [(&'static str, usize); 4] {
        [
            ("closure function", self.closure),
            ("previous context", self.previous),
            ("extension", self.extension),
            ("global object", self.global),
        ]
    }
}

/// A Context copied out of the target
#[derive(Debug)]
pub struct Context {
    array: FixedArray,
    slots: ContextSlots,
}

impl Context {
    /// Load the Context that `value` points to
    pub fn load(heap: &HeapInspector<'_>, value: TaggedValue, policy: AllocPolicy) -> DecodeResult<Self> {
        let slots = ContextSlots::resolve(heap)?;
        let alt_type = heap.layout().types.context;
        let array = FixedArray::load_as(heap, value, "Context", alt_type, policy)?;

        let len = array.len();
        let highest = slots.labelled().iter().map(|&(_, idx)| idx).max().unwrap_or(0);
        if len < slots.ncommon || highest >= len {
            tracing::warn!(object = format_args!("{:#x}", array.address()), len, "context array is too short");
            return Err(DecodeError::corrupt_array(array.address(), "context array is too short"));
        }

        Ok(Self { array, slots })
    }

    /// Untagged address of the Context
    pub fn address(&self) -> u64 {
        self.array.address()
    }

    /// Total slot count, static and dynamic
    pub fn len(&self) -> usize {
        self.array.len()
    }

    /// Whether the Context has no slots (never true for a loaded Context)
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    fn slot(&self, index: usize) -> TaggedValue {
        debug_assert!(index < self.array.len());
        self.array.get(index).unwrap_or_default()
    }

    /// The closure this Context belongs to
    pub fn closure(&self) -> TaggedValue {
        self.slot(self.slots.closure)
    }

    /// The enclosing Context
    pub fn previous_context(&self) -> TaggedValue {
        self.slot(self.slots.previous)
    }

    /// The extension object (`with` scopes, sloppy-mode `eval`)
    pub fn extension(&self) -> TaggedValue {
        self.slot(self.slots.extension)
    }

    /// The global object
    pub fn global_object(&self) -> TaggedValue {
        self.slot(self.slots.global)
    }

    /// Number of dynamic (variable) slots
    pub fn dynamic_len(&self) -> usize {
        self.array.len().saturating_sub(self.slots.ncommon)
    }

    /// Value of the `i`th context-local variable
    pub fn variable(&self, i: usize) -> DecodeResult<TaggedValue> {
        let len = self.dynamic_len();
        if i >= len {
            tracing::warn!(
                object = format_args!("{:#x}", self.address()),
                "variable index {i} is out of range"
            );
            return Err(DecodeError::IndexOutOfRange { index: i, len });
        }
        Ok(self.slot(i + self.slots.ncommon))
    }

    /// Static slots with their labels
    pub fn static_slots(&self) -> impl Iterator<Item = (&'static str, TaggedValue)> + '_ {
        self.slots
            .labelled()
            .into_iter()
            .map(|(label, idx)| (label, self.slot(idx)))
    }

    /// Dynamic slots with their variable index
    pub fn dynamic_slots(&self) -> impl Iterator<Item = (usize, TaggedValue)> + '_ {
        self.array.slots()[self.slots.ncommon..]
            .iter()
            .copied()
            .enumerate()
    }

    /// Visit the static slots until the visitor breaks
    pub fn visit_static_slots<B>(
        &self,
        mut visit: impl FnMut(&'static str, TaggedValue) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        for (label, value) in self.static_slots() {
            visit(label, value)?;
        }
        ControlFlow::Continue(())
    }

    /// Visit the dynamic slots until the visitor breaks
    pub fn visit_dynamic_slots<B>(
        &self,
        mut visit: impl FnMut(usize, TaggedValue) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        for (index, value) in self.dynamic_slots() {
            visit(index, value)?;
        }
        ControlFlow::Continue(())
    }

    /// Load the ScopeInfo of this Context's closure
    pub fn scope_info(&self, heap: &HeapInspector<'_>, policy: AllocPolicy) -> DecodeResult<ScopeInfo> {
        let function = JsFunction::load(heap, self.closure(), policy)?;
        function.scope_info(heap, policy)
    }
}
