//! Shared builtin types.

use crate::error::BuiltinError;

pub use serde_json::Value;

/// Outcome of a builtin call.
///
/// `Ok(None)` means the builtin produced no value (undefined), which the
/// guest sees as the zero handle.
pub type BuiltinResult = Result<Option<Value>, BuiltinError>;

/// A host-implemented builtin: positional arguments in, one value out.
///
/// Arity is not part of the type; builtins check their own argument count
/// (see [`expect_arity`]).
pub type BuiltinFn = dyn Fn(&[Value]) -> BuiltinResult + Send + Sync;

/// Fail with `BuiltinError::Arity` unless exactly `expected` arguments were passed.
pub fn expect_arity(args: &[Value], expected: usize) -> Result<(), BuiltinError> {
    if args.len() != expected {
        return Err(BuiltinError::Arity {
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}
