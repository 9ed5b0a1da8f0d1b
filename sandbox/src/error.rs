//! Policy runtime error types.

use regolith_hostapi::BuiltinError;

/// Top-level error type for the sandbox crate.
///
/// Loading errors (`ModuleLoad`, `InvalidModule`, `UnsupportedAbi`) are
/// fatal to the module. Everything else is fatal to the current call only;
/// the `Policy` that raised it stays usable.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The module bytes could not be compiled or instantiated.
    #[error("failed to load policy module: {0}")]
    ModuleLoad(String),

    /// The module does not provide the exports or imports the ABI requires.
    #[error("invalid policy module: {0}")]
    InvalidModule(String),

    /// The module declares an ABI major version this runtime does not speak.
    #[error("unsupported ABI version {0}")]
    UnsupportedAbi(i32),

    /// A host value could not be moved into guest memory.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A guest value could not be read back into a host value.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The guest called a builtin id missing from the module's builtin table.
    #[error("unknown builtin id {0}")]
    UnknownBuiltin(i32),

    /// The guest called a builtin the registry has no implementation for.
    #[error("builtin '{0}' is not implemented")]
    UnimplementedBuiltin(String),

    /// A builtin implementation returned an error.
    #[error("builtin '{name}' failed: {source}")]
    BuiltinExecution {
        name: String,
        #[source]
        source: BuiltinError,
    },

    /// The guest called `opa_abort`.
    #[error("policy aborted: {0}")]
    Abort(String),

    /// No entrypoint with this name exists in the module.
    #[error("unknown entrypoint '{0}'")]
    UnknownEntrypoint(String),

    /// No entrypoint with this id exists in the module.
    #[error("unknown entrypoint id {0}")]
    UnknownEntrypointId(i32),

    /// An entrypoint selector was neither a name nor an id.
    #[error("entrypoint must be a string or an integer, got {0}")]
    InvalidEntrypointType(String),

    /// The guest's `eval` export returned a non-zero status.
    #[error("eval failed with code {0}")]
    EvalFailed(i32),

    /// Memory operation failed (out-of-bounds, grow failure).
    #[error("memory error: {0}")]
    Memory(String),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),

    /// Wasmtime engine error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),
}

/// Convert the result of a guest call, recovering typed errors from traps.
///
/// Host callbacks fail by returning a `PolicyError` through wasmtime, which
/// surfaces here as the call's error; it is downcast back to its variant.
/// Fuel exhaustion → `PolicyError::FuelExhausted`
/// Other traps → `PolicyError::GuestTrapped`
pub(crate) fn handle_trap<R>(result: anyhow::Result<R>) -> Result<R, PolicyError> {
    result.map_err(|e| {
        if matches!(e.downcast_ref::<wasmtime::Trap>(), Some(wasmtime::Trap::OutOfFuel)) {
            return PolicyError::FuelExhausted;
        }
        match e.downcast::<PolicyError>() {
            Ok(err) => err,
            Err(e) => PolicyError::GuestTrapped(format!("{:#}", e)),
        }
    })
}
