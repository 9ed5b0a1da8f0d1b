//! Value marshalling between host values and guest memory.
//!
//! Values cross the boundary as JSON text. Encoding allocates a buffer with
//! the guest's `opa_malloc`, writes the text, and has the guest parse it
//! with `opa_json_parse` into its own representation, yielding a handle.
//! Decoding asks `opa_json_dump` to render a handle back to null-terminated
//! text and deserializes it. The bridge never frees anything; the session
//! reclaims guest memory in bulk by resetting the heap pointer.

use serde_json::Value;
use wasmtime::{AsContextMut, Instance, TypedFunc};

use crate::abi::typed_export;
use crate::error::{handle_trap, PolicyError};
use crate::memory::LinearMemory;

/// Encodes and decodes structured values through one guest instance.
///
/// Holds only export handles and the memory handle, so it is cheap to clone
/// into host callbacks. Every operation takes the store it runs against.
#[derive(Clone)]
pub struct MemoryBridge {
    memory: LinearMemory,
    malloc: TypedFunc<i32, i32>,
    json_parse: TypedFunc<(i32, i32), i32>,
    json_dump: TypedFunc<i32, i32>,
}

impl MemoryBridge {
    pub fn resolve(
        mut store: impl AsContextMut,
        instance: &Instance,
        memory: LinearMemory,
    ) -> Result<Self, PolicyError> {
        Ok(Self {
            memory,
            malloc: typed_export(&mut store, instance, "opa_malloc")?,
            json_parse: typed_export(&mut store, instance, "opa_json_parse")?,
            json_dump: typed_export(&mut store, instance, "opa_json_dump")?,
        })
    }

    pub fn memory(&self) -> LinearMemory {
        self.memory
    }

    /// Move `value` into guest memory and return its handle.
    ///
    /// `None` (undefined) is handle 0 and does not touch guest memory.
    pub fn encode(
        &self,
        mut store: impl AsContextMut,
        value: Option<&Value>,
    ) -> Result<i32, PolicyError> {
        let Some(value) = value else {
            return Ok(0);
        };
        let text = serde_json::to_vec(value)
            .map_err(|e| PolicyError::Serialization(e.to_string()))?;
        let len = i32::try_from(text.len()).map_err(|_| {
            PolicyError::Serialization(format!("value of {} bytes is too large", text.len()))
        })?;

        let addr = handle_trap(self.malloc.call(&mut store, len))?;
        // Memory may have grown inside opa_malloc; the write re-derives its view.
        self.memory.write(&mut store, addr, &text)?;

        let handle = handle_trap(self.json_parse.call(&mut store, (addr, len)))?;
        if handle == 0 {
            return Err(PolicyError::Serialization(
                "guest failed to parse value".into(),
            ));
        }
        Ok(handle)
    }

    /// Read the value behind `handle` back into a host value.
    pub fn decode(&self, mut store: impl AsContextMut, handle: i32) -> Result<Value, PolicyError> {
        if handle == 0 {
            return Err(PolicyError::Deserialization("null value handle".into()));
        }
        let addr = handle_trap(self.json_dump.call(&mut store, handle))?;
        self.decode_text(&mut store, addr)
    }

    /// Deserialize the null-terminated JSON text at `addr`.
    pub fn decode_text(&self, store: impl AsContextMut, addr: i32) -> Result<Value, PolicyError> {
        let bytes = self.memory.read_cstr(&store, addr)?;
        serde_json::from_slice(&bytes).map_err(|e| PolicyError::Deserialization(e.to_string()))
    }
}

/// Read a null-terminated message directly from memory, replacing invalid UTF-8.
///
/// Used for `opa_abort` and `opa_println` arguments, which are plain C strings
/// rather than value handles.
pub fn decode_cstring(
    memory: LinearMemory,
    store: impl AsContextMut,
    addr: i32,
) -> Result<String, PolicyError> {
    let bytes = memory.read_cstr(&store, addr)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
