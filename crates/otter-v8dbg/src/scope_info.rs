//! ScopeInfo decoding
//!
//! A ScopeInfo describes the variables of one function scope. It starts with
//! a fixed header whose count slots give the number of variables of each
//! kind, followed by the variable names, one region per kind:
//!
//! ```text
//! [ header ... | params | stack-local sub-header | stack locals | context locals ]
//! ```
//!
//! Region boundaries are not stored; they follow from the counts and the
//! configured sub-header widths.

use std::ops::ControlFlow;

use crate::alloc::AllocPolicy;
use crate::array::FixedArray;
use crate::config::{ScopeInfoLayout, required};
use crate::context::Context;
use crate::error::{DecodeError, DecodeResult};
use crate::heap::HeapInspector;
use crate::tagged::{TagLayout, TaggedKind, TaggedValue};

/// Kind of scope variable, in ScopeInfo region order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Function parameter
    Parameter,
    /// Local held in a stack frame
    StackLocal,
    /// Local captured in the Context
    ContextLocal,
}

impl VarKind {
    /// Every kind, in region order
    pub const ALL: [VarKind; 3] = [VarKind::Parameter, VarKind::StackLocal, VarKind::ContextLocal];

    /// Human-readable name
    pub fn label(self) -> &'static str {
        match self {
            VarKind::Parameter => "parameter",
            VarKind::StackLocal => "stack local variable",
            VarKind::ContextLocal => "context local variable",
        }
    }
}

impl std::fmt::Display for VarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One variable of a ScopeInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeVar {
    /// Kind of variable
    pub kind: VarKind,
    /// Position among the variables of its kind
    pub ordinal: usize,
    /// Slot of the variable's name within the ScopeInfo
    pub slot: usize,
}

impl ScopeVar {
    /// Index of this variable among a Context's dynamic slots
    ///
    /// Only context locals live in the Context.
    pub fn context_index(&self) -> Option<usize> {
        (self.kind == VarKind::ContextLocal).then_some(self.ordinal)
    }
}

/// Resolved header slot indices
#[derive(Debug, Clone, Copy)]
struct Header {
    nparams: usize,
    nstacklocals: usize,
    ncontextlocals: usize,
    first_vars: usize,
    stack_locals_offset: usize,
}

impl Header {
    fn resolve(layout: &ScopeInfoLayout) -> DecodeResult<Self> {
        Ok(Self {
            nparams: required(layout.idx_nparams, "scope_info", "idx_nparams")?,
            nstacklocals: required(layout.idx_nstacklocals, "scope_info", "idx_nstacklocals")?,
            ncontextlocals: required(layout.idx_ncontextlocals, "scope_info", "idx_ncontextlocals")?,
            first_vars: required(layout.idx_first_vars, "scope_info", "idx_first_vars")?,
            stack_locals_offset: layout.offset_stack_locals.unwrap_or(0),
        })
    }

    fn count_slot(&self, kind: VarKind) -> usize {
        match kind {
            VarKind::Parameter => self.nparams,
            VarKind::StackLocal => self.nstacklocals,
            VarKind::ContextLocal => self.ncontextlocals,
        }
    }

    fn sub_header(&self, kind: VarKind) -> usize {
        match kind {
            VarKind::StackLocal => self.stack_locals_offset,
            _ => 0,
        }
    }
}

/// A ScopeInfo copied out of the target
#[derive(Debug)]
pub struct ScopeInfo {
    array: FixedArray,
    header: Header,
    tags: TagLayout,
}

impl ScopeInfo {
    /// Load the ScopeInfo that `value` points to
    pub fn load(heap: &HeapInspector<'_>, value: TaggedValue, policy: AllocPolicy) -> DecodeResult<Self> {
        let header = Header::resolve(&heap.layout().scope_info)?;
        let alt_type = heap.layout().types.scope_info;
        let array = FixedArray::load_as(heap, value, "ScopeInfo", alt_type, policy)?;
        let address = array.address();

        let count_slots = VarKind::ALL.map(|kind| header.count_slot(kind));
        if array.len() < header.first_vars || count_slots.iter().any(|&idx| idx >= array.len()) {
            tracing::warn!(object = format_args!("{address:#x}"), "array too short to be a ScopeInfo");
            return Err(DecodeError::corrupt_array(address, "array too short to be a ScopeInfo"));
        }

        let tags = *heap.tags();
        let counts_ok = count_slots.iter().all(|&idx| {
            let slot = array.get(idx).unwrap_or_default();
            matches!(tags.classify(slot), TaggedKind::SmallInt(n) if n >= 0)
        });
        if !counts_ok {
            tracing::warn!(object = format_args!("{address:#x}"), "static ScopeInfo fields do not look like SMIs");
            return Err(DecodeError::corrupt_array(
                address,
                "static ScopeInfo fields do not look like SMIs",
            ));
        }

        Ok(Self { array, header, tags })
    }

    /// Untagged address of the ScopeInfo
    pub fn address(&self) -> u64 {
        self.array.address()
    }

    /// Total slot count
    pub fn len(&self) -> usize {
        self.array.len()
    }

    /// Whether there are no slots (never true for a loaded ScopeInfo)
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Variable kinds in region order
    pub fn kinds(&self) -> impl Iterator<Item = VarKind> {
        VarKind::ALL.into_iter()
    }

    /// Number of variables of `kind`
    pub fn variable_count(&self, kind: VarKind) -> usize {
        let slot = self.array.get(self.header.count_slot(kind)).unwrap_or_default();
        debug_assert!(self.tags.is_smi(slot));
        usize::try_from(self.tags.to_small_int(slot)).unwrap_or(0)
    }

    /// First slot of the region holding `kind`'s names
    pub fn region_start(&self, kind: VarKind) -> usize {
        let mut start = self.header.first_vars;
        for other in VarKind::ALL {
            start = start.saturating_add(self.header.sub_header(other));
            if other == kind {
                break;
            }
            start = start.saturating_add(self.variable_count(other));
        }
        start
    }

    /// Variables of `kind`, in order
    ///
    /// If the region runs past the end of the array, the iterator yields one
    /// `ShortOrCorruptArray` error and stops.
    pub fn vars(&self, kind: VarKind) -> ScopeVars<'_> {
        ScopeVars {
            info: self,
            kind,
            start: self.region_start(kind),
            count: self.variable_count(kind),
            next: 0,
        }
    }

    /// Visit the variables of `kind` until the visitor breaks
    ///
    /// Variables visited before a short array is detected stay visited.
    pub fn visit_vars<B>(
        &self,
        kind: VarKind,
        mut visit: impl FnMut(&ScopeVar) -> ControlFlow<B>,
    ) -> DecodeResult<ControlFlow<B>> {
        for var in self.vars(kind) {
            if let ControlFlow::Break(b) = visit(&var?) {
                return Ok(ControlFlow::Break(b));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Tagged pointer to the variable's name string
    pub fn variable_name(&self, var: &ScopeVar) -> TaggedValue {
        debug_assert!(var.slot < self.array.len());
        self.array.get(var.slot).unwrap_or_default()
    }

    /// Position of the variable among those of its kind
    pub fn variable_index(&self, var: &ScopeVar) -> usize {
        var.ordinal
    }

    /// Value of a context-local variable in `context`
    pub fn context_local(&self, context: &Context, var: &ScopeVar) -> DecodeResult<TaggedValue> {
        match var.context_index() {
            Some(index) => context.variable(index),
            None => Err(DecodeError::IndexOutOfRange {
                index: var.ordinal,
                len: 0,
            }),
        }
    }
}

/// Iterator over the variables of one kind
#[derive(Debug)]
pub struct ScopeVars<'a> {
    info: &'a ScopeInfo,
    kind: VarKind,
    start: usize,
    count: usize,
    next: usize,
}

impl Iterator for ScopeVars<'_> {
    type Item = DecodeResult<ScopeVar>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let ordinal = self.next;
        let slot = self.start.saturating_add(ordinal);
        if slot >= self.info.len() {
            self.next = self.count;
            tracing::warn!(object = format_args!("{:#x}", self.info.address()), "short scopeinfo");
            return Some(Err(DecodeError::corrupt_array(self.info.address(), "short scopeinfo")));
        }
        self.next += 1;
        Some(Ok(ScopeVar {
            kind: self.kind,
            ordinal,
            slot,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.count - self.next))
    }
}

impl std::iter::FusedIterator for ScopeVars<'_> {}
