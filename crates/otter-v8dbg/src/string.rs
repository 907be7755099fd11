//! V8 string decoding
//!
//! A V8 string is one of four representations:
//!
//! - sequential: the characters follow the header, one or two bytes each
//! - cons: the concatenation of two other strings
//! - sliced: a range of a parent string
//! - external: the characters live outside the heap, behind a resource
//!   object owned by the embedder
//!
//! [`V8String::write`] walks that structure recursively and appends the text
//! to a [`StringBuffer`]. Cons and sliced strings can nest, so the walk
//! carries an explicit depth and gives up past [`MAX_DEPTH`]. Output that
//! would overflow the buffer is cut short and marked with
//! [`TRUNCATION_MARKER`]; that counts as success, and nothing further is
//! visited once the buffer is full.

use std::ops::ControlFlow;

use crate::alloc::AllocPolicy;
use crate::error::{DecodeError, DecodeResult};
use crate::heap::HeapInspector;
use crate::strbuf::{EscapeMode, StringBuffer};
use crate::tagged::TaggedValue;

/// Deepest nesting of cons/sliced strings that will be followed
pub const MAX_DEPTH: u32 = 512;

/// Appended in place of the rest of a string that does not fit
pub const TRUNCATION_MARKER: &str = "[...]";

/// Characters are read from the target in chunks of this many bytes
const READ_CHUNK: usize = 8192;

/// Character width of a string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    /// Latin-1 (or ASCII on older builds), one byte per character
    OneByte,
    /// UTF-16, two bytes per character
    TwoByte,
}

impl StringEncoding {
    /// Bytes per character
    #[inline]
    pub fn width(self) -> usize {
        match self {
            StringEncoding::OneByte => 1,
            StringEncoding::TwoByte => 2,
        }
    }
}

/// How a string's characters are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Characters inline after the header
    Sequential,
    /// `first` followed by `second`
    Concatenated {
        /// Left half
        first: TaggedValue,
        /// Right half
        second: TaggedValue,
    },
    /// `length` characters of `parent` starting at `offset`
    Sliced {
        /// The string being sliced
        parent: TaggedValue,
        /// First character of the slice within the parent
        offset: usize,
    },
    /// Characters held by an embedder resource
    External {
        /// Address of the resource object
        resource: u64,
        /// Address of the character data (one-byte strings only)
        data: Option<u64>,
    },
}

/// Options for [`V8String::write`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Surround the text with double quotes
    pub quoted: bool,
    /// Emit a debug event for each string visited
    pub verbose: bool,
    /// Current nesting depth
    pub depth: u32,
}

impl WriteFlags {
    /// Flags for writing with quotes
    pub fn quoted() -> Self {
        Self {
            quoted: true,
            ..Self::default()
        }
    }

    /// Same flags at a given depth
    pub fn with_depth(self, depth: u32) -> Self {
        Self { depth, ..self }
    }

    /// Flags for a component string one level down
    pub fn nested(self) -> Self {
        Self {
            quoted: false,
            depth: self.depth.saturating_add(1),
            ..self
        }
    }
}

/// A string object loaded from the target
#[derive(Debug, Clone)]
pub struct V8String {
    address: u64,
    length: usize,
    type_tag: u8,
    encoding: StringEncoding,
    representation: Representation,
    policy: AllocPolicy,
}

impl V8String {
    /// Load the string that `value` points to
    pub fn load(heap: &HeapInspector<'_>, value: TaggedValue, policy: AllocPolicy) -> DecodeResult<Self> {
        let address = heap.heap_address(value)?;
        let type_tag = heap.read_type_byte(address)?;
        let tags = heap.layout().string_tags()?;

        if !tags.is_string(type_tag) {
            tracing::warn!(object = format_args!("{address:#x}"), "not a string (type {type_tag:#04x})");
            return Err(DecodeError::WrongTypeTag {
                address,
                expected: "String",
                found: type_tag,
            });
        }

        let encoding = if tags.is_one_byte(type_tag) {
            StringEncoding::OneByte
        } else {
            StringEncoding::TwoByte
        };

        let length = heap.read_smi(address, "String", "length")?;
        let length = usize::try_from(length).map_err(|_| DecodeError::CorruptField {
            address,
            field: "String.length".into(),
            reason: "negative length",
        })?;

        let bits = type_tag & tags.representation_mask;
        let representation = if bits == tags.seq_tag {
            Representation::Sequential
        } else if bits == tags.cons_tag {
            let parts = heap
                .read_ptr(address, "ConsString", "first")
                .and_then(|first| Ok((first, heap.read_ptr(address, "ConsString", "second")?)));
            let (first, second) = parts.inspect_err(|_| {
                tracing::warn!(object = format_args!("{address:#x}"), "failed to read cons ptrs");
            })?;
            Representation::Concatenated { first, second }
        } else if bits == tags.sliced_tag {
            let parent = heap.read_ptr(address, "SlicedString", "parent")?;
            let offset = heap.read_smi(address, "SlicedString", "offset")?;
            let offset = usize::try_from(offset).map_err(|_| DecodeError::CorruptField {
                address,
                field: "SlicedString.offset".into(),
                reason: "negative offset",
            })?;
            Representation::Sliced { parent, offset }
        } else if bits == tags.external_tag {
            let resource = heap.read_ptr(address, "ExternalString", "resource")?.raw();
            let data = match encoding {
                StringEncoding::OneByte => {
                    let slot = heap.field_address(resource, "ExternalStringResource", "data")?;
                    let data = heap.read_word(slot).inspect_err(|_| {
                        tracing::warn!(
                            object = format_args!("{address:#x}"),
                            "failed to read external string resource"
                        );
                    })?;
                    Some(data.raw())
                }
                StringEncoding::TwoByte => None,
            };
            Representation::External { resource, data }
        } else {
            tracing::warn!(object = format_args!("{address:#x}"), "unsupported string type {type_tag:#04x}");
            return Err(DecodeError::UnsupportedRepresentation { address, type_tag });
        };

        Ok(Self {
            address,
            length,
            type_tag,
            encoding,
            representation,
            policy,
        })
    }

    /// Untagged address of the string
    #[inline]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Length in characters
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Raw instance type byte
    #[inline]
    pub fn type_tag(&self) -> u8 {
        self.type_tag
    }

    /// Character width
    #[inline]
    pub fn encoding(&self) -> StringEncoding {
        self.encoding
    }

    /// Whether characters are stored one byte each
    #[inline]
    pub fn is_one_byte(&self) -> bool {
        self.encoding == StringEncoding::OneByte
    }

    /// Storage representation
    #[inline]
    pub fn representation(&self) -> &Representation {
        &self.representation
    }

    /// Append the string's text to `buf`
    ///
    /// With `flags.quoted`, the closing quote is written even if the body
    /// failed. Errors leave whatever was written so far in `buf`.
    pub fn write(
        &self,
        heap: &HeapInspector<'_>,
        buf: &mut StringBuffer,
        mode: EscapeMode,
        flags: WriteFlags,
    ) -> DecodeResult<()> {
        if flags.depth > MAX_DEPTH {
            return depth_exceeded(buf, mode, flags.depth);
        }

        if !flags.quoted {
            return self.write_range(heap, buf, mode, flags, 0, self.length).map(drop);
        }

        buf.append_char(u16::from(b'"'), mode);
        buf.reserve(1);
        let inner = WriteFlags {
            quoted: false,
            ..flags
        };
        let result = self.write_range(heap, buf, mode, inner, 0, self.length);
        buf.reserve(-1);
        buf.append_char(u16::from(b'"'), mode);
        result.map(drop)
    }

    /// Decode the whole string into a new buffer of `capacity` bytes
    pub fn to_text(&self, heap: &HeapInspector<'_>, capacity: usize, mode: EscapeMode) -> DecodeResult<String> {
        let mut buf = StringBuffer::new(capacity);
        self.write(heap, &mut buf, mode, WriteFlags::default())?;
        Ok(buf.into_string())
    }

    /// Append characters `start..start + len` of this string
    ///
    /// The range is clamped to the string's own length. Breaks once the
    /// buffer is full.
    fn write_range(
        &self,
        heap: &HeapInspector<'_>,
        buf: &mut StringBuffer,
        mode: EscapeMode,
        flags: WriteFlags,
        start: usize,
        len: usize,
    ) -> DecodeResult<ControlFlow<()>> {
        if flags.depth > MAX_DEPTH {
            return depth_exceeded(buf, mode, flags.depth).map(ControlFlow::Continue);
        }
        if buf.bytes_left() == 0 {
            return Ok(ControlFlow::Break(()));
        }

        let start = start.min(self.length);
        let len = len.min(self.length - start);

        if flags.verbose {
            self.log_visit(flags.depth, start, len);
        }

        match self.representation {
            Representation::Sequential => {
                let field = match self.encoding {
                    StringEncoding::OneByte => "SeqOneByteString",
                    StringEncoding::TwoByte => "SeqTwoByteString",
                };
                let chars = heap.field_address(self.address, field, "chars")?;
                self.write_chars(heap, buf, mode, chars, start, len)
                    .inspect_err(|err| {
                        tracing::warn!(object = format_args!("{:#x}", self.address), "failed to read string: {err}");
                    })
            }
            Representation::Concatenated { first, second } => {
                let child = flags.nested();
                let first = V8String::load(heap, first, self.policy)?;
                let split = first.length;
                if start < split {
                    let n = len.min(split - start);
                    if first.write_range(heap, buf, mode, child, start, n)?.is_break() {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                let end = start + len;
                if end > split {
                    let second = V8String::load(heap, second, self.policy)?;
                    let from = start.saturating_sub(split);
                    return second.write_range(heap, buf, mode, child, from, end - split.max(start));
                }
                Ok(ControlFlow::Continue(()))
            }
            Representation::Sliced { parent, offset } => {
                let parent = V8String::load(heap, parent, self.policy)?;
                parent.write_range(heap, buf, mode, flags.nested(), offset.saturating_add(start), len)
            }
            Representation::External { data, .. } => {
                let Some(data) = data else {
                    buf.append_str("<external two-byte string>", mode);
                    return Ok(ControlFlow::Continue(()));
                };
                match self.write_chars(heap, buf, mode, data, start, len) {
                    Ok(flow) => Ok(flow),
                    Err(err @ DecodeError::NonAsciiExternalData { .. }) => Err(err),
                    Err(err) => {
                        buf.append_str("<failed to read external string data>", mode);
                        Err(err)
                    }
                }
            }
        }
    }

    #[inline(never)]
    fn log_visit(&self, depth: u32, start: usize, len: usize) {
        tracing::debug!(
            object = format_args!("{:#x}", self.address),
            length = self.length,
            encoding = ?self.encoding,
            representation = ?self.representation,
            depth,
            start,
            len,
            "writing string"
        );
    }

    /// Stream `len` characters starting at character `start` of the data at
    /// `base`
    ///
    /// For external data the first byte is checked before anything is
    /// appended. Breaks after writing the truncation marker.
    fn write_chars(
        &self,
        heap: &HeapInspector<'_>,
        buf: &mut StringBuffer,
        mode: EscapeMode,
        base: u64,
        start: usize,
        len: usize,
    ) -> DecodeResult<ControlFlow<()>> {
        let width = self.encoding.width();
        let external = matches!(self.representation, Representation::External { .. });
        let chunk_chars = READ_CHUNK / width;

        let chunk_len = len.min(chunk_chars) * width;
        let (mut chunk, _reservation) = heap.budget().allocate_vec::<u8>(chunk_len, self.policy)?;
        chunk.resize(chunk_len, 0);

        let mut done = 0;
        while done < len {
            let n = (len - done).min(chunk_chars);
            let address = char_address(base, start.saturating_add(done), width).ok_or_else(|| DecodeError::CorruptField {
                address: self.address,
                field: "String.length".into(),
                reason: "character data overflows the address space",
            })?;
            let bytes = &mut chunk[..n * width];
            heap.read_bytes(address, bytes)?;

            if external && done == 0 && bytes[0] != 0 && !bytes[0].is_ascii() {
                buf.append_str("<found non-ASCII external string data>", mode);
                return Err(DecodeError::NonAsciiExternalData { address: self.address });
            }

            for unit in bytes.chunks_exact(width) {
                if buf.bytes_left() <= TRUNCATION_MARKER.len() {
                    buf.append_str(TRUNCATION_MARKER, EscapeMode::Raw);
                    return Ok(ControlFlow::Break(()));
                }
                let c = match unit {
                    [lo, hi] => u16::from_le_bytes([*lo, *hi]),
                    [b, ..] => u16::from(*b),
                    [] => 0,
                };
                buf.append_char(c, mode);
            }
            done += n;
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// Load the string at `value` and append it to `buf` in one step
pub fn write_string(
    heap: &HeapInspector<'_>,
    value: TaggedValue,
    buf: &mut StringBuffer,
    mode: EscapeMode,
    flags: WriteFlags,
    policy: AllocPolicy,
) -> DecodeResult<()> {
    V8String::load(heap, value, policy)?.write(heap, buf, mode, flags)
}

fn depth_exceeded(buf: &mut StringBuffer, mode: EscapeMode, depth: u32) -> DecodeResult<()> {
    tracing::warn!(depth, "maximum string depth exceeded");
    buf.append_str("<maximum depth exceeded>", mode);
    Err(DecodeError::DepthExceeded { depth })
}

fn char_address(base: u64, index: usize, width: usize) -> Option<u64> {
    (index as u64)
        .checked_mul(width as u64)
        .and_then(|offset| base.checked_add(offset))
}
