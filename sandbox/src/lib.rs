//! `regolith-sandbox` — Wasmtime host runtime for compiled policy modules.
//!
//! This crate loads a pre-compiled policy module into a Wasmtime sandbox
//! and evaluates it against caller-supplied input. It provides:
//!
//! - **Value marshalling:** JSON text through the guest's allocator and parser
//! - **Builtin dispatch:** guest `opa_builtinN` calls routed to a host registry
//! - **ABI negotiation:** version check, export validation, id/name tables
//! - **Heap checkpoints:** bulk reclamation of guest memory between calls
//!
//! The primary entry points are [`load`] and [`Policy::evaluate`].

pub mod error;
pub mod config;
pub mod memory;
pub mod abi;
pub mod bridge;
pub mod host_impl;
pub mod dispatch;
pub mod validation;
pub mod linker;
pub mod runtime;
pub mod session;

pub use abi::{AbiVersion, BuiltinTable, EntrypointTable, ABI_VERSION};
pub use config::PolicyConfig;
pub use error::PolicyError;
pub use runtime::{load, PolicyModule};
pub use session::{Entrypoint, Policy};
