//! `regolith-hostapi` — builtin registry traits and types for the regolith policy runtime.
//!
//! Compiled policy modules call back into the host for builtin functions
//! they cannot evaluate themselves. This crate defines the host-side seam
//! the sandbox dispatches those calls through:
//!
//! - `BuiltinRegistry` trait — name-based lookup of builtin implementations
//! - `Builtins` — in-memory `BuiltinRegistry` backed by a map
//! - `BuiltinFn` — the positional-argument function shape every builtin has
//! - `BuiltinError` — what a builtin returns when it cannot produce a value
//!
//! Values crossing the seam are plain `serde_json::Value`s; the sandbox
//! takes care of moving them in and out of guest memory.

pub mod error;
pub mod types;
pub mod registry;
pub mod traits;

// Re-export commonly used types at the crate root.
pub use error::BuiltinError;
pub use types::{expect_arity, BuiltinFn, BuiltinResult, Value};
pub use registry::Builtins;
pub use traits::BuiltinRegistry;
