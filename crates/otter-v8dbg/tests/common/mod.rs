//! Synthetic V8 heap for integration tests
//!
//! Objects are laid out according to `fixtures/layout.toml` in one
//! contiguous segment. Every helper returns the tagged pointer to the new
//! object.

#![allow(dead_code)]

use std::collections::HashMap;

use otter_v8dbg::{Layout, MemoryImage, TaggedValue};

pub const BASE: u64 = 0x1000_0000;

pub const LAYOUT_TOML: &str = include_str!("../fixtures/layout.toml");

pub const TYPE_SEQ_ONE_BYTE: u8 = 0x04;
pub const TYPE_SEQ_TWO_BYTE: u8 = 0x00;
pub const TYPE_CONS_ONE_BYTE: u8 = 0x05;
pub const TYPE_EXTERNAL_ONE_BYTE: u8 = 0x06;
pub const TYPE_EXTERNAL_TWO_BYTE: u8 = 0x02;
pub const TYPE_SLICED_ONE_BYTE: u8 = 0x07;
pub const TYPE_SHARED_INFO: u8 = 0x88;
pub const TYPE_SCRIPT: u8 = 0x90;
pub const TYPE_FIXED_ARRAY: u8 = 0xa5;
pub const TYPE_JS_ARRAY: u8 = 0xb3;
pub const TYPE_JS_FUNCTION: u8 = 0xb5;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn layout() -> Layout {
    Layout::from_toml_str(LAYOUT_TOML).unwrap()
}

pub struct HeapBuilder {
    layout: Layout,
    bytes: Vec<u8>,
    maps: HashMap<u8, TaggedValue>,
}

impl HeapBuilder {
    pub fn new() -> Self {
        Self::with_layout(layout())
    }

    pub fn with_layout(layout: Layout) -> Self {
        Self {
            layout,
            bytes: Vec::new(),
            maps: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn layout_mut(&mut self) -> &mut Layout {
        &mut self.layout
    }

    pub fn build(self) -> (MemoryImage, Layout) {
        let mut image = MemoryImage::new();
        image.map(BASE, self.bytes);
        (image, self.layout)
    }

    // ========================================================================
    // Raw memory
    // ========================================================================

    pub fn smi(&self, value: i64) -> TaggedValue {
        self.layout.tags.from_small_int(value)
    }

    pub fn tagged(address: u64) -> TaggedValue {
        TaggedValue::from_raw(address + 1)
    }

    pub fn untagged(value: TaggedValue) -> u64 {
        value.raw() - 1
    }

    /// Reserve `size` zeroed bytes, 8-byte aligned
    pub fn alloc(&mut self, size: usize) -> u64 {
        let address = BASE + self.bytes.len() as u64;
        let size = size.max(8).div_ceil(8) * 8;
        self.bytes.resize(self.bytes.len() + size, 0);
        address
    }

    pub fn write_bytes(&mut self, address: u64, data: &[u8]) {
        let start = (address - BASE) as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn write_word(&mut self, address: u64, value: TaggedValue) {
        self.write_bytes(address, &value.raw().to_le_bytes());
    }

    pub fn read_word(&self, address: u64) -> TaggedValue {
        let start = (address - BASE) as usize;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.bytes[start..start + 8]);
        TaggedValue::from_raw(u64::from_le_bytes(bytes))
    }

    fn offset(&self, class: &str, field: &str) -> u64 {
        self.layout.offset(class, field).unwrap()
    }

    /// Write `value` into `class.field` of the object `object` points to
    pub fn set_field(&mut self, object: TaggedValue, class: &str, field: &str, value: TaggedValue) {
        let address = Self::untagged(object) + self.offset(class, field);
        self.write_word(address, value);
    }

    fn map_for(&mut self, type_tag: u8) -> TaggedValue {
        if let Some(&map) = self.maps.get(&type_tag) {
            return map;
        }
        let address = self.alloc(16);
        let at = address + self.offset("Map", "instance_attributes");
        self.write_bytes(at, &[type_tag]);
        let map = Self::tagged(address);
        self.maps.insert(type_tag, map);
        map
    }

    /// Allocate an object of `size` bytes with a map for `type_tag`
    pub fn object(&mut self, type_tag: u8, size: usize) -> TaggedValue {
        let map = self.map_for(type_tag);
        let address = self.alloc(size);
        let object = Self::tagged(address);
        self.set_field(object, "HeapObject", "map", map);
        object
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    pub fn fixed_array(&mut self, slots: &[TaggedValue]) -> TaggedValue {
        let length = self.smi(slots.len() as i64);
        self.array_with_length(TYPE_FIXED_ARRAY, length, slots)
    }

    /// Array object whose length slot holds `length`, whatever `slots` is
    pub fn array_with_length(&mut self, type_tag: u8, length: TaggedValue, slots: &[TaggedValue]) -> TaggedValue {
        let data = self.offset("FixedArray", "data");
        let array = self.object(type_tag, data as usize + slots.len() * 8);
        self.set_field(array, "FixedArray", "length", length);
        let base = Self::untagged(array) + data;
        for (i, slot) in slots.iter().enumerate() {
            self.write_word(base + 8 * i as u64, *slot);
        }
        array
    }

    pub fn js_array(&mut self, length: usize, elements: &[TaggedValue]) -> TaggedValue {
        let store = self.fixed_array(elements);
        let array = self.object(TYPE_JS_ARRAY, 32);
        let length = self.smi(length as i64);
        self.set_field(array, "JSArray", "length", length);
        self.set_field(array, "JSObject", "elements", store);
        array
    }

    // ========================================================================
    // Strings
    // ========================================================================

    pub fn string_length(&self, string: TaggedValue) -> usize {
        let address = Self::untagged(string) + self.offset("String", "length");
        self.layout.tags.to_small_int(self.read_word(address)) as usize
    }

    fn string_header(&mut self, type_tag: u8, size: usize, length: usize) -> TaggedValue {
        let string = self.object(type_tag, size);
        let length = self.smi(length as i64);
        self.set_field(string, "String", "length", length);
        string
    }

    pub fn seq_string(&mut self, text: &str) -> TaggedValue {
        let chars = self.offset("SeqOneByteString", "chars");
        let string = self.string_header(TYPE_SEQ_ONE_BYTE, chars as usize + text.len(), text.len());
        self.write_bytes(Self::untagged(string) + chars, text.as_bytes());
        string
    }

    pub fn seq_two_byte(&mut self, text: &str) -> TaggedValue {
        let units: Vec<u16> = text.encode_utf16().collect();
        let chars = self.offset("SeqTwoByteString", "chars");
        let string = self.string_header(TYPE_SEQ_TWO_BYTE, chars as usize + units.len() * 2, units.len());
        let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        self.write_bytes(Self::untagged(string) + chars, &bytes);
        string
    }

    pub fn cons_string(&mut self, first: TaggedValue, second: TaggedValue) -> TaggedValue {
        let length = self.string_length(first) + self.string_length(second);
        let string = self.string_header(TYPE_CONS_ONE_BYTE, 40, length);
        self.set_field(string, "ConsString", "first", first);
        self.set_field(string, "ConsString", "second", second);
        string
    }

    pub fn sliced_string(&mut self, parent: TaggedValue, offset: usize, length: usize) -> TaggedValue {
        let string = self.string_header(TYPE_SLICED_ONE_BYTE, 40, length);
        self.set_field(string, "SlicedString", "parent", parent);
        let offset = self.smi(offset as i64);
        self.set_field(string, "SlicedString", "offset", offset);
        string
    }

    /// One-byte external string whose characters live outside any object
    pub fn external_string(&mut self, data: &[u8]) -> TaggedValue {
        let chars = self.alloc(data.len());
        self.write_bytes(chars, data);

        let resource = self.alloc(16);
        let at = resource + self.offset("ExternalStringResource", "data");
        self.write_word(at, TaggedValue::from_raw(chars));

        let string = self.string_header(TYPE_EXTERNAL_ONE_BYTE, 32, data.len());
        self.set_field(string, "ExternalString", "resource", TaggedValue::from_raw(resource));
        string
    }

    /// One-byte external string whose data pointer is `data`
    pub fn external_string_at(&mut self, data: u64, length: usize) -> TaggedValue {
        let resource = self.alloc(16);
        let at = resource + self.offset("ExternalStringResource", "data");
        self.write_word(at, TaggedValue::from_raw(data));

        let string = self.string_header(TYPE_EXTERNAL_ONE_BYTE, 32, length);
        self.set_field(string, "ExternalString", "resource", TaggedValue::from_raw(resource));
        string
    }

    pub fn external_two_byte(&mut self, length: usize) -> TaggedValue {
        let resource = self.alloc(16);
        let string = self.string_header(TYPE_EXTERNAL_TWO_BYTE, 32, length);
        self.set_field(string, "ExternalString", "resource", TaggedValue::from_raw(resource));
        string
    }

    // ========================================================================
    // Functions and scopes
    // ========================================================================

    pub fn context(
        &mut self,
        closure: TaggedValue,
        previous: TaggedValue,
        extension: TaggedValue,
        global: TaggedValue,
        vars: &[TaggedValue],
    ) -> TaggedValue {
        let mut slots = vec![closure, previous, extension, global];
        slots.extend_from_slice(vars);
        self.fixed_array(&slots)
    }

    /// ScopeInfo with a zero flags slot and one stack-local sub-header slot
    pub fn scope_info(
        &mut self,
        params: &[TaggedValue],
        stack_locals: &[TaggedValue],
        context_locals: &[TaggedValue],
    ) -> TaggedValue {
        let mut slots = vec![
            self.smi(0),
            self.smi(params.len() as i64),
            self.smi(stack_locals.len() as i64),
            self.smi(context_locals.len() as i64),
        ];
        slots.extend_from_slice(params);
        slots.push(self.smi(0));
        slots.extend_from_slice(stack_locals);
        slots.extend_from_slice(context_locals);
        self.fixed_array(&slots)
    }

    pub fn script(&mut self, name: TaggedValue, line_ends: TaggedValue) -> TaggedValue {
        let script = self.object(TYPE_SCRIPT, 32);
        self.set_field(script, "Script", "name", name);
        self.set_field(script, "Script", "line_ends", line_ends);
        script
    }

    pub fn shared_info(
        &mut self,
        name: TaggedValue,
        inferred_name: TaggedValue,
        script: TaggedValue,
        scope_info: TaggedValue,
        token_position: i64,
    ) -> TaggedValue {
        let shared = self.object(TYPE_SHARED_INFO, 48);
        self.set_field(shared, "SharedFunctionInfo", "name", name);
        self.set_field(shared, "SharedFunctionInfo", "inferred_name", inferred_name);
        self.set_field(shared, "SharedFunctionInfo", "script", script);
        self.set_field(shared, "SharedFunctionInfo", "scope_info", scope_info);
        let token = self.smi(token_position);
        self.set_field(shared, "SharedFunctionInfo", "function_token_position", token);
        shared
    }

    pub fn function(&mut self, shared: TaggedValue, context: TaggedValue) -> TaggedValue {
        let function = self.object(TYPE_JS_FUNCTION, 48);
        self.set_field(function, "JSFunction", "shared", shared);
        self.set_field(function, "JSFunction", "context", context);
        function
    }
}

/// A closure `counter(start, step)` capturing `count` in its Context
pub struct Closure {
    pub function: TaggedValue,
    pub context: TaggedValue,
    pub scope_info: TaggedValue,
    pub global: TaggedValue,
}

pub fn closure(heap: &mut HeapBuilder) -> Closure {
    let names = ["start", "step", "tmp", "i", "j", "count"].map(|n| heap.seq_string(n));
    let scope_info = heap.scope_info(&names[0..2], &names[2..5], &names[5..6]);

    let script_name = heap.seq_string("/srv/app/counter.js");
    let line_ends = heap.fixed_array(&[]);
    let script = heap.script(script_name, line_ends);
    let name = heap.seq_string("counter");
    let inferred = heap.seq_string("makeCounter.counter");
    let shared = heap.shared_info(name, inferred, script, scope_info, 117);

    let global = heap.object(TYPE_JS_ARRAY, 32);
    // the closure slot is patched once the function exists
    let placeholder = heap.smi(0);
    let count = heap.smi(41);
    let extension = heap.smi(0);
    let context = heap.context(placeholder, placeholder, extension, global, &[count]);
    let function = heap.function(shared, context);

    let closure_slot = HeapBuilder::untagged(context) + 16;
    heap.write_word(closure_slot, function);

    Closure {
        function,
        context,
        scope_info,
        global,
    }
}
