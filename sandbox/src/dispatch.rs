//! Builtin call dispatch.
//!
//! The guest calls `opa_builtinN(id, ctx, args...)` from inside its own
//! `eval`. Dispatch resolves the id to a name through the module's builtin
//! table, finds the implementation in the registry, decodes the argument
//! handles in call order, runs the builtin, and encodes its result back
//! into guest memory.
//!
//! Dispatch runs re-entrantly while the guest still holds handles from the
//! current evaluation, so it only ever allocates; it never moves the heap
//! pointer.

use std::sync::Arc;

use wasmtime::Caller;

use crate::error::PolicyError;
use crate::host_impl::HostState;

/// Dispatch one builtin call and return the result handle (0 for undefined).
pub fn dispatch(
    caller: &mut Caller<'_, HostState>,
    id: i32,
    arg_handles: &[i32],
) -> Result<i32, PolicyError> {
    let state = caller.data();
    let name = state
        .builtins
        .name(id)
        .ok_or(PolicyError::UnknownBuiltin(id))?
        .to_string();
    let registry = Arc::clone(&state.registry);
    let bridge = state
        .bridge
        .clone()
        .ok_or_else(|| PolicyError::InvalidModule("builtin called during instantiation".into()))?;

    let func = registry
        .lookup(&name)
        .ok_or_else(|| PolicyError::UnimplementedBuiltin(name.clone()))?;

    tracing::trace!(id, name = %name, arity = arg_handles.len(), "dispatching builtin");

    let mut args = Vec::with_capacity(arg_handles.len());
    for &handle in arg_handles {
        args.push(bridge.decode(&mut *caller, handle)?);
    }

    let result = func(&args).map_err(|source| PolicyError::BuiltinExecution { name, source })?;
    bridge.encode(&mut *caller, result.as_ref())
}
