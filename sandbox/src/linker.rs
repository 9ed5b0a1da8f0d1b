//! Host function registration via Wasmtime linker.
//!
//! Registers the `env` imports a compiled policy module expects:
//! `opa_abort`, `opa_println`, and `opa_builtin0` through `opa_builtin4`.
//! The set is fixed and registered once per instance; each callback reaches
//! per-instance state through its `Caller`.
//!
//! Callbacks fail by returning a `PolicyError` to wasmtime, which unwinds
//! the guest and hands the error back to whoever called into it.

use wasmtime::{Caller, Linker};

use crate::bridge::decode_cstring;
use crate::dispatch::dispatch;
use crate::error::PolicyError;
use crate::host_impl::HostState;

/// Module name of every import the guest may declare.
pub const IMPORT_MODULE: &str = "env";

/// Import names the linker provides, besides `memory`.
pub const HOST_FUNCTIONS: &[&str] = &[
    "opa_abort",
    "opa_println",
    "opa_builtin0",
    "opa_builtin1",
    "opa_builtin2",
    "opa_builtin3",
    "opa_builtin4",
];

/// Read a C string argument from the host-created memory.
fn read_message(caller: &mut Caller<'_, HostState>, addr: i32) -> Result<String, PolicyError> {
    let memory = caller
        .data()
        .memory
        .ok_or_else(|| PolicyError::Memory("no linear memory".into()))?;
    decode_cstring(memory, &mut *caller, addr)
}

/// Register all `env` host functions with the linker.
pub fn register_host_functions(linker: &mut Linker<HostState>) -> Result<(), PolicyError> {
    register_abort(linker)?;
    register_println(linker)?;
    register_builtins(linker)?;
    Ok(())
}

fn register_abort(linker: &mut Linker<HostState>) -> Result<(), PolicyError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "opa_abort",
        |mut caller: Caller<'_, HostState>, addr: i32| -> anyhow::Result<()> {
            let message = read_message(&mut caller, addr)?;
            Err(PolicyError::Abort(message).into())
        },
    )?;
    Ok(())
}

fn register_println(linker: &mut Linker<HostState>) -> Result<(), PolicyError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "opa_println",
        |mut caller: Caller<'_, HostState>, addr: i32| {
            // Informational only: an unreadable message never fails the guest.
            match read_message(&mut caller, addr) {
                Ok(message) => caller.data_mut().add_log(message),
                Err(e) => tracing::warn!(addr, error = %e, "unreadable guest log message"),
            }
        },
    )?;
    Ok(())
}

fn register_builtins(linker: &mut Linker<HostState>) -> Result<(), PolicyError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "opa_builtin0",
        |mut caller: Caller<'_, HostState>, id: i32, _ctx: i32| -> anyhow::Result<i32> {
            Ok(dispatch(&mut caller, id, &[])?)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "opa_builtin1",
        |mut caller: Caller<'_, HostState>, id: i32, _ctx: i32, a: i32| -> anyhow::Result<i32> {
            Ok(dispatch(&mut caller, id, &[a])?)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "opa_builtin2",
        |mut caller: Caller<'_, HostState>,
         id: i32,
         _ctx: i32,
         a: i32,
         b: i32|
         -> anyhow::Result<i32> { Ok(dispatch(&mut caller, id, &[a, b])?) },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "opa_builtin3",
        |mut caller: Caller<'_, HostState>,
         id: i32,
         _ctx: i32,
         a: i32,
         b: i32,
         c: i32|
         -> anyhow::Result<i32> { Ok(dispatch(&mut caller, id, &[a, b, c])?) },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "opa_builtin4",
        |mut caller: Caller<'_, HostState>,
         id: i32,
         _ctx: i32,
         a: i32,
         b: i32,
         c: i32,
         d: i32|
         -> anyhow::Result<i32> { Ok(dispatch(&mut caller, id, &[a, b, c, d])?) },
    )?;
    Ok(())
}
