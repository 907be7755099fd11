//! JSFunction decoding
//!
//! A JSFunction pairs a SharedFunctionInfo (code, name, script, ScopeInfo;
//! shared by every closure created from the same source function) with the
//! Context it closed over.

use crate::alloc::AllocPolicy;
use crate::context::Context;
use crate::error::{DecodeError, DecodeResult};
use crate::heap::HeapInspector;
use crate::scope_info::ScopeInfo;
use crate::strbuf::{EscapeMode, StringBuffer};
use crate::string::{V8String, WriteFlags};
use crate::tagged::TaggedValue;

/// A closure loaded from the target
#[derive(Debug, Clone, Copy)]
pub struct JsFunction {
    address: u64,
    shared: TaggedValue,
    policy: AllocPolicy,
}

impl JsFunction {
    /// Load the JSFunction that `value` points to
    pub fn load(heap: &HeapInspector<'_>, value: TaggedValue, policy: AllocPolicy) -> DecodeResult<Self> {
        let js_function = heap.layout().types.js_function;
        if js_function.is_none() {
            return Err(DecodeError::missing("types", "js_function"));
        }
        let (address, _) = heap.expect_type(value, "JSFunction", &[js_function])?;
        let shared = heap.read_ptr(address, "JSFunction", "shared").inspect_err(|_| {
            tracing::warn!(object = format_args!("{address:#x}"), "no SharedFunctionInfo");
        })?;
        Ok(Self {
            address,
            shared,
            policy,
        })
    }

    /// Untagged address of the function
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Tagged pointer to the SharedFunctionInfo
    pub fn shared(&self) -> TaggedValue {
        self.shared
    }

    /// Allocation policy the function was loaded with
    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    /// Load the Context this closure captured
    pub fn context(&self, heap: &HeapInspector<'_>, policy: AllocPolicy) -> DecodeResult<Context> {
        let context = heap.read_ptr(self.address, "JSFunction", "context").inspect_err(|_| {
            tracing::warn!(object = format_args!("{:#x}", self.address), "failed to read context");
        })?;
        Context::load(heap, context, policy)
    }

    /// Load the ScopeInfo of the function's SharedFunctionInfo
    pub fn scope_info(&self, heap: &HeapInspector<'_>, policy: AllocPolicy) -> DecodeResult<ScopeInfo> {
        if heap.layout().try_offset("SharedFunctionInfo", "scope_info").is_none() {
            tracing::warn!("could not find \"scope_info\"");
            return Err(DecodeError::missing("SharedFunctionInfo", "scope_info"));
        }
        let shared = heap.heap_address(self.shared)?;
        let scope_info = heap.read_ptr(shared, "SharedFunctionInfo", "scope_info")?;
        ScopeInfo::load(heap, scope_info, policy)
    }

    /// Read the function's name, script and position
    pub fn describe(&self, heap: &HeapInspector<'_>, policy: AllocPolicy) -> DecodeResult<FunctionInfo> {
        let shared = heap.heap_address(self.shared)?;
        let token = heap.read_maybe_smi(shared, "SharedFunctionInfo", "function_token_position")?;
        let name = heap.read_ptr(shared, "SharedFunctionInfo", "name")?;
        let script = heap.read_ptr(shared, "SharedFunctionInfo", "script")?;

        let script_address = heap.heap_address(script)?;
        let script_name = heap.read_ptr(script_address, "Script", "name")?;
        let line_ends = heap.read_ptr(script_address, "Script", "line_ends")?;

        // absent on some builds
        let inferred_name = heap
            .layout()
            .try_offset("SharedFunctionInfo", "inferred_name")
            .and_then(|_| heap.read_ptr(shared, "SharedFunctionInfo", "inferred_name").ok());

        Ok(FunctionInfo {
            script,
            name,
            inferred_name,
            script_name,
            line_ends,
            token_position: heap.tags().from_small_int(token),
            policy,
        })
    }
}

/// Name and location of a function
#[derive(Debug, Clone, Copy)]
pub struct FunctionInfo {
    script: TaggedValue,
    name: TaggedValue,
    inferred_name: Option<TaggedValue>,
    script_name: TaggedValue,
    line_ends: TaggedValue,
    token_position: TaggedValue,
    policy: AllocPolicy,
}

impl FunctionInfo {
    /// The Script object
    pub fn script(&self) -> TaggedValue {
        self.script
    }

    /// Declared name (a string, possibly empty)
    pub fn name(&self) -> TaggedValue {
        self.name
    }

    /// Name inferred from the surrounding code, if the build records one
    pub fn inferred_name(&self) -> Option<TaggedValue> {
        self.inferred_name
    }

    /// Script path (usually a string)
    pub fn script_name(&self) -> TaggedValue {
        self.script_name
    }

    /// Line-ends array of the script
    pub fn line_ends(&self) -> TaggedValue {
        self.line_ends
    }

    /// Position of the `function` token, SMI-encoded
    pub fn token_position(&self) -> TaggedValue {
        self.token_position
    }

    /// Append the function's name, or its inferred name if it has none
    pub fn write_name(&self, heap: &HeapInspector<'_>, buf: &mut StringBuffer, mode: EscapeMode) -> DecodeResult<()> {
        let name = V8String::load(heap, self.name, self.policy)?;
        if name.length() == 0
            && let Some(inferred) = self.inferred_name
        {
            let inferred = V8String::load(heap, inferred, self.policy)?;
            return inferred.write(heap, buf, mode, WriteFlags::default());
        }
        name.write(heap, buf, mode, WriteFlags::default())
    }

    /// Append the script path
    pub fn write_script_path(
        &self,
        heap: &HeapInspector<'_>,
        buf: &mut StringBuffer,
        mode: EscapeMode,
    ) -> DecodeResult<()> {
        V8String::load(heap, self.script_name, self.policy)?.write(heap, buf, mode, WriteFlags::default())
    }
}
