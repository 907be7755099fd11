//! Heap layout configuration
//!
//! Field offsets, type tags and slot indices change with every V8 build, so
//! the decoder takes them from a [`Layout`] loaded once before decoding.
//! Nothing is defaulted: an entry that is absent makes the operations that
//! need it fail with [`DecodeError::MissingConfiguration`].
//!
//! Layouts are usually written as TOML:
//!
//! ```toml
//! version = "node-v4.4.7-x64"
//!
//! [tags]
//! pointer_size = 8
//! heap_object_tag = 1
//! heap_object_tag_mask = 3
//! smi_tag = 0
//! smi_tag_mask = 1
//! smi_value_shift = 1
//! smi_shift_size = 31
//!
//! [types]
//! js_function = 0xb5
//! fixed_array = 0xa5
//!
//! [offsets.JSFunction]
//! shared = 32
//! context = 40
//! ```
//!
//! Offsets are byte offsets from the start of the (untagged) object.

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{DecodeError, DecodeResult};
use crate::tagged::TagLayout;

/// Default cap on a single allocation made while decoding (64MB)
const DEFAULT_MAX_ALLOCATION: usize = 64 * 1024 * 1024;

/// Default soft limit on bytes held by loaded objects (256MB)
const DEFAULT_BUDGET: usize = 256 * 1024 * 1024;

/// Errors while loading a layout
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the layout file
    #[error("failed to read layout '{path}': {source}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("failed to parse layout: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or schema error
    #[error("failed to parse layout: {0}")]
    Json(#[from] serde_json::Error),

    /// Parsed, but the values cannot describe a real target
    #[error("invalid layout: {0}")]
    Invalid(String),
}

/// Complete heap layout for one V8 build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    /// Free-form description of the build this layout belongs to
    #[serde(default)]
    pub version: Option<String>,
    /// Tagging scheme
    pub tags: TagLayout,
    /// Instance type bytes
    #[serde(default)]
    pub types: TypeLayout,
    /// Static Context slots
    #[serde(default)]
    pub context: ContextLayout,
    /// ScopeInfo header slots
    #[serde(default)]
    pub scope_info: ScopeInfoLayout,
    /// Field offsets keyed by class, then field
    #[serde(default)]
    pub offsets: FxHashMap<String, FxHashMap<String, u64>>,
    /// Decoder resource limits
    #[serde(default)]
    pub limits: Limits,
}

/// Instance type bytes (read from `Map.instance_attributes`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeLayout {
    /// `JS_FUNCTION_TYPE`
    pub js_function: Option<u8>,
    /// `FIXED_ARRAY_TYPE`
    pub fixed_array: Option<u8>,
    /// `JS_ARRAY_TYPE`
    pub js_array: Option<u8>,
    /// Dedicated Context type on builds that have one
    pub context: Option<u8>,
    /// Dedicated ScopeInfo type on builds that have one
    pub scope_info: Option<u8>,
    /// String type bits
    pub strings: Option<StringTags>,
}

/// Bit fields of a string's instance type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringTags {
    /// `kIsNotStringMask`
    pub is_not_string_mask: u8,
    /// `kStringTag`
    pub string_tag: u8,
    /// `kStringEncodingMask`
    pub encoding_mask: u8,
    /// `kOneByteStringTag` (newer builds)
    #[serde(default)]
    pub one_byte_tag: Option<u8>,
    /// `kAsciiStringTag` (older builds)
    #[serde(default)]
    pub ascii_tag: Option<u8>,
    /// `kStringRepresentationMask`
    pub representation_mask: u8,
    /// `kSeqStringTag`
    pub seq_tag: u8,
    /// `kConsStringTag`
    pub cons_tag: u8,
    /// `kSlicedStringTag`
    pub sliced_tag: u8,
    /// `kExternalStringTag`
    pub external_tag: u8,
}

impl StringTags {
    /// Does this type byte denote any kind of string?
    pub fn is_string(&self, type_tag: u8) -> bool {
        type_tag & self.is_not_string_mask == self.string_tag
    }

    /// Is the string stored one byte per character?
    pub fn is_one_byte(&self, type_tag: u8) -> bool {
        let encoding = type_tag & self.encoding_mask;
        self.one_byte_tag == Some(encoding) || self.ascii_tag == Some(encoding)
    }
}

/// Indices of the statically-defined Context slots
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLayout {
    /// `CLOSURE_INDEX`
    pub idx_closure: Option<usize>,
    /// `PREVIOUS_INDEX`
    pub idx_previous: Option<usize>,
    /// `EXTENSION_INDEX`
    pub idx_extension: Option<usize>,
    /// `GLOBAL_OBJECT_INDEX`
    pub idx_global: Option<usize>,
    /// `MIN_CONTEXT_SLOTS`: number of static slots
    pub ncommon: Option<usize>,
}

/// Header slots of a ScopeInfo
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeInfoLayout {
    /// Slot holding the parameter count
    pub idx_nparams: Option<usize>,
    /// Slot holding the stack-local count
    pub idx_nstacklocals: Option<usize>,
    /// Slot holding the context-local count
    pub idx_ncontextlocals: Option<usize>,
    /// First slot after the fixed header
    pub idx_first_vars: Option<usize>,
    /// Width of the sub-header before the stack-local names
    /// (`StackLocalFirstSlot`); absent on builds without one
    pub offset_stack_locals: Option<usize>,
}

/// Resource limits applied while decoding
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest single allocation a load may make
    pub max_allocation_bytes: usize,
    /// Soft limit on bytes held by loaded objects
    pub budget_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_allocation_bytes: DEFAULT_MAX_ALLOCATION,
            budget_bytes: DEFAULT_BUDGET,
        }
    }
}

impl Layout {
    /// Parse a TOML layout
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let layout: Self = toml::from_str(content)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Parse a JSON layout
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let layout: Self = serde_json::from_str(content)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Load a layout file; `.json` files are parsed as JSON, anything else as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let layout = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        tracing::debug!(
            path = %path.display(),
            version = layout.version.as_deref().unwrap_or("unknown"),
            "loaded heap layout"
        );
        Ok(layout)
    }

    /// Check the values that the decoder relies on for memory safety
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tags = &self.tags;
        if tags.pointer_size != 4 && tags.pointer_size != 8 {
            return Err(ConfigError::Invalid(format!(
                "pointer_size must be 4 or 8, got {}",
                tags.pointer_size
            )));
        }
        let shift = tags.smi_value_shift.saturating_add(tags.smi_shift_size);
        if shift >= tags.word_bits() {
            return Err(ConfigError::Invalid(format!(
                "SMI shift {} leaves no value bits in a {}-bit word",
                shift,
                tags.word_bits()
            )));
        }
        if tags.failure_tag.is_some() != tags.failure_tag_mask.is_some() {
            return Err(ConfigError::Invalid(
                "failure_tag and failure_tag_mask must be set together".into(),
            ));
        }
        if let Some(strings) = &self.types.strings
            && strings.one_byte_tag.is_none()
            && strings.ascii_tag.is_none()
        {
            return Err(ConfigError::Invalid(
                "strings need one_byte_tag or ascii_tag".into(),
            ));
        }
        Ok(())
    }

    /// Byte offset of `class.field`
    pub fn offset(&self, class: &str, field: &str) -> DecodeResult<u64> {
        self.offsets
            .get(class)
            .and_then(|fields| fields.get(field))
            .copied()
            .ok_or_else(|| DecodeError::missing(class, field))
    }

    /// Byte offset of `class.field`, or `None` if the build lacks it
    pub fn try_offset(&self, class: &str, field: &str) -> Option<u64> {
        self.offsets.get(class)?.get(field).copied()
    }

    /// Set an offset (used when building layouts programmatically)
    pub fn set_offset(&mut self, class: &str, field: &str, offset: u64) {
        self.offsets
            .entry(class.to_string())
            .or_default()
            .insert(field.to_string(), offset);
    }

    /// String type bits
    pub fn string_tags(&self) -> DecodeResult<&StringTags> {
        self.types
            .strings
            .as_ref()
            .ok_or_else(|| DecodeError::missing("types", "strings"))
    }
}

/// Unwrap an optional layout entry or fail with `MissingConfiguration`
pub(crate) fn required<T: Copy>(value: Option<T>, class: &str, field: &str) -> DecodeResult<T> {
    value.ok_or_else(|| DecodeError::missing(class, field))
}
