//! Bounded output buffer
//!
//! [`StringBuffer`] collects decoded text up to a fixed capacity. It never
//! grows: once full, further appends are dropped without error, so callers
//! check [`StringBuffer::bytes_left`] when they want to mark truncation
//! themselves. Part of the capacity can be held back with
//! [`StringBuffer::reserve`] so that a closing delimiter always fits.

use std::fmt;

/// How characters are rewritten on the way into the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    /// Keep every character (UTF-16 code units that are not valid scalar
    /// values become `?`)
    #[default]
    Raw,
    /// Replace anything outside printable ASCII with `?`
    AsciiOnly,
    /// Escape for a JSON string literal, then apply the ASCII rule
    Json,
}

/// Fixed-capacity text sink
#[derive(Debug, Clone)]
pub struct StringBuffer {
    buf: String,
    capacity: usize,
    reserved: usize,
}

impl StringBuffer {
    /// Create a buffer that holds at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            capacity,
            reserved: 0,
        }
    }

    /// Bytes that may still be appended, excluding the reserved margin
    #[inline]
    pub fn bytes_left(&self) -> usize {
        self.capacity
            .saturating_sub(self.reserved)
            .saturating_sub(self.buf.len())
    }

    /// Hold back `n` bytes of capacity, or give back `-n` bytes
    pub fn reserve(&mut self, n: isize) {
        if n >= 0 {
            self.reserved = self.reserved.saturating_add(n.unsigned_abs());
        } else {
            self.reserved = self.reserved.saturating_sub(n.unsigned_abs());
        }
    }

    /// Append one UTF-16 code unit
    pub fn append_char(&mut self, c: u16, mode: EscapeMode) {
        match mode {
            EscapeMode::Raw => {
                let ch = char::from_u32(u32::from(c)).unwrap_or('?');
                self.push_fitting(ch.encode_utf8(&mut [0u8; 4]));
            }
            EscapeMode::AsciiOnly => self.push_ascii(ascii_or_placeholder(c)),
            EscapeMode::Json => match json_escape(c) {
                Some(escape) => self.push_fitting(escape),
                None if c < 0x20 => self.push_ascii(b'?'),
                None => self.push_ascii(ascii_or_placeholder(c)),
            },
        }
    }

    /// Append each character of `s`
    pub fn append_str(&mut self, s: &str, mode: EscapeMode) {
        match mode {
            EscapeMode::Raw => self.push_fitting(s),
            _ => {
                for unit in s.encode_utf16() {
                    if self.bytes_left() == 0 {
                        break;
                    }
                    self.append_char(unit, mode);
                }
            }
        }
    }

    /// Discard the contents and any reservation
    pub fn rewind(&mut self) {
        self.buf.clear();
        self.reserved = 0;
    }

    /// Text written so far
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Bytes written so far
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Total capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the text out of the buffer
    pub fn into_string(self) -> String {
        self.buf
    }

    fn push_ascii(&mut self, byte: u8) {
        if self.bytes_left() > 0 {
            self.buf.push(char::from(byte));
        }
    }

    /// Append the longest prefix of `s` that fits, never splitting a character
    fn push_fitting(&mut self, s: &str) {
        let left = self.bytes_left();
        if s.len() <= left {
            self.buf.push_str(s);
            return;
        }
        let mut end = left;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
    }
}

impl fmt::Write for StringBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_fitting(s);
        Ok(())
    }
}

impl fmt::Display for StringBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

fn ascii_or_placeholder(c: u16) -> u8 {
    match u8::try_from(c) {
        Ok(b @ 0x20..=0x7e) => b,
        _ => b'?',
    }
}

fn json_escape(c: u16) -> Option<&'static str> {
    match c {
        0x08 => Some("\\b"),
        0x0a => Some("\\n"),
        0x0d => Some("\\r"),
        0x5c => Some("\\\\"),
        0x22 => Some("\\\""),
        _ => None,
    }
}
