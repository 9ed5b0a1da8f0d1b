//! Per-instance mutable state held in the Wasmtime Store.
//!
//! `HostState` is what host callbacks see through their `Caller`: the
//! builtin registry and table for dispatch, the memory bridge for
//! marshalling, and the guest log buffer.

use std::sync::Arc;

use regolith_hostapi::BuiltinRegistry;

use crate::abi::BuiltinTable;
use crate::bridge::MemoryBridge;
use crate::config::PolicyConfig;
use crate::memory::LinearMemory;

/// Per-instance mutable state held in the Wasmtime `Store`.
///
/// Lives as long as the `Policy` that owns the store. The memory, bridge,
/// and builtin table are filled in by the loader as they become available.
pub struct HostState {
    /// Builtin implementations, resolved by name.
    pub registry: Arc<dyn BuiltinRegistry>,
    /// Builtin ids the module uses, mapped to names.
    pub builtins: BuiltinTable,
    /// Host-created linear memory shared with the guest.
    pub memory: Option<LinearMemory>,
    /// Marshalling exports; available once the module is instantiated.
    pub bridge: Option<MemoryBridge>,
    /// Guest log lines captured during the current call.
    pub logs: Vec<String>,
    enable_guest_logs: bool,
    max_log_lines: usize,
}

impl HostState {
    pub fn new(registry: Arc<dyn BuiltinRegistry>, config: &PolicyConfig) -> Self {
        Self {
            registry,
            builtins: BuiltinTable::default(),
            memory: None,
            bridge: None,
            logs: Vec::new(),
            enable_guest_logs: config.enable_guest_logs,
            max_log_lines: config.max_log_lines,
        }
    }

    /// Record a guest log line. Drops lines past the configured limit.
    pub fn add_log(&mut self, message: String) {
        tracing::info!(target: "regolith::guest", "{}", message);
        if !self.enable_guest_logs || self.logs.len() >= self.max_log_lines {
            return;
        }
        self.logs.push(message);
    }
}
