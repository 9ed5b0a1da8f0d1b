//! Bounds-checked access to the guest's linear memory.
//!
//! The guest can grow its memory during any call into it, and growth may
//! move the backing storage. `LinearMemory` therefore never hands out a
//! view that outlives a single read or write: every access re-derives the
//! byte slice from the store and checks it against the current length.

use wasmtime::{AsContext, AsContextMut, Memory};

use crate::error::PolicyError;

/// Size of one linear memory page.
pub const PAGE_SIZE: usize = 65536;

/// Write `data` bytes to guest memory at `ptr`.
///
/// Returns `Err(Memory)` if the range `[ptr, ptr+data.len())` is out of bounds.
pub fn write_bytes(mem: &mut [u8], ptr: i32, data: &[u8]) -> Result<(), PolicyError> {
    if ptr < 0 {
        return Err(out_of_bounds(ptr));
    }
    let start = ptr as usize;
    let end = start
        .checked_add(data.len())
        .ok_or_else(|| out_of_bounds(ptr))?;
    mem.get_mut(start..end)
        .ok_or_else(|| out_of_bounds(ptr))?
        .copy_from_slice(data);
    Ok(())
}

/// Read the null-terminated byte run starting at `ptr`, without the terminator.
///
/// The scan stops at the end of memory; a run with no terminator before
/// that is an error rather than a read past the region.
pub fn read_cstr(mem: &[u8], ptr: i32) -> Result<&[u8], PolicyError> {
    if ptr < 0 {
        return Err(out_of_bounds(ptr));
    }
    let tail = mem.get(ptr as usize..).ok_or_else(|| out_of_bounds(ptr))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| PolicyError::Memory(format!("unterminated string at {}", ptr)))?;
    Ok(&tail[..len])
}

fn out_of_bounds(ptr: i32) -> PolicyError {
    PolicyError::Memory(format!("address {} out of bounds", ptr))
}

/// Handle to the linear memory shared by the host and one guest instance.
#[derive(Debug, Clone, Copy)]
pub struct LinearMemory {
    memory: Memory,
}

impl LinearMemory {
    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    /// Current size in bytes.
    pub fn len(&self, store: impl AsContext) -> usize {
        self.memory.data_size(store)
    }

    /// Current size in pages.
    pub fn pages(&self, store: impl AsContext) -> u64 {
        self.memory.size(store)
    }

    /// Copy the null-terminated byte run at `ptr` out of guest memory.
    pub fn read_cstr(&self, store: impl AsContext, ptr: i32) -> Result<Vec<u8>, PolicyError> {
        read_cstr(self.memory.data(&store), ptr).map(<[u8]>::to_vec)
    }

    /// Write `data` at `ptr`. The range must already be inside memory.
    pub fn write(
        &self,
        mut store: impl AsContextMut,
        ptr: i32,
        data: &[u8],
    ) -> Result<(), PolicyError> {
        write_bytes(self.memory.data_mut(&mut store), ptr, data)
    }

    /// Grow memory until it covers at least `end` bytes.
    pub fn ensure_len(&self, mut store: impl AsContextMut, end: usize) -> Result<(), PolicyError> {
        let current = self.memory.data_size(&store);
        if end <= current {
            return Ok(());
        }
        let pages = (end - current).div_ceil(PAGE_SIZE) as u64;
        self.memory
            .grow(&mut store, pages)
            .map_err(|e| PolicyError::Memory(format!("grow by {} pages: {}", pages, e)))?;
        Ok(())
    }
}
