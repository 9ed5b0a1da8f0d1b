//! Builtin registry trait — the lookup the sandbox dispatches builtin calls through.
//!
//! The registry is an explicit dependency handed to each policy instance,
//! never ambient state, so instances can be tested with mock registries.
//! It works with decoded values only; guest pointers never reach it.

use crate::types::BuiltinFn;

/// Name-based lookup of builtin implementations.
///
/// Names are the stable builtin names the compiler emits (for example
/// `"count"` or `"custom.is_admin"`), not the numeric ids a particular
/// module assigns to them.
pub trait BuiltinRegistry: Send + Sync {
    /// Find the implementation registered under `name`.
    fn lookup(&self, name: &str) -> Option<&BuiltinFn>;

    /// Whether an implementation is registered under `name`.
    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}
