//! # Otter V8 Heap Decoder
//!
//! Reads V8 heap objects out of a memory snapshot without running any V8
//! code: closures, their captured Contexts and ScopeInfos, and strings in
//! all four internal representations.
//!
//! ## Design
//!
//! - **Data-driven layout**: offsets, type tags and slot indices come from a
//!   [`Layout`] loaded for the target's V8 build
//! - **Untrusted input**: every byte may be corrupt; loads validate before
//!   trusting and fail with a [`DecodeError`] instead of panicking
//! - **Owned copies**: each `load` copies what it needs out of the target and
//!   books it against a [`MemoryBudget`]
//!
//! ## Example
//!
//! ```ignore
//! let layout = Layout::load("node-v4-x64.toml")?;
//! let heap = HeapInspector::new(&image, layout);
//!
//! let function = JsFunction::load(&heap, closure, AllocPolicy::Blocking)?;
//! let context = function.context(&heap, AllocPolicy::Blocking)?;
//! let scope = function.scope_info(&heap, AllocPolicy::Blocking)?;
//!
//! for var in scope.vars(VarKind::ContextLocal) {
//!     let var = var?;
//!     let mut name = StringBuffer::new(256);
//!     write_string(&heap, scope.variable_name(&var), &mut name,
//!         EscapeMode::AsciiOnly, WriteFlags::default(), AllocPolicy::Blocking)?;
//!     let value = scope.context_local(&context, &var)?;
//!     println!("{name}: {value:#x}");
//! }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod alloc;
pub mod array;
pub mod config;
pub mod context;
pub mod error;
pub mod function;
pub mod heap;
pub mod memory;
pub mod scope_info;
pub mod strbuf;
pub mod string;
pub mod tagged;

pub use alloc::{AllocPolicy, MemoryBudget, Reservation};
pub use array::{FixedArray, JsArray};
pub use config::{ConfigError, Layout};
pub use context::Context;
pub use error::{DecodeError, DecodeResult};
pub use function::{FunctionInfo, JsFunction};
pub use heap::HeapInspector;
pub use memory::{MemoryImage, ReadError, TargetMemory};
pub use scope_info::{ScopeInfo, ScopeVar, VarKind};
pub use strbuf::{EscapeMode, StringBuffer};
pub use string::{MAX_DEPTH, Representation, StringEncoding, TRUNCATION_MARKER, V8String, WriteFlags, write_string};
pub use tagged::{TagLayout, TaggedKind, TaggedValue};
