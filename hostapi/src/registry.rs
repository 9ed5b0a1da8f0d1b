//! In-memory builtin registry.
//!
//! `Builtins` implements `BuiltinRegistry` using a `BTreeMap` so that name
//! listings come out in a stable order. It is what most embedders and all
//! tests hand to the sandbox.

use std::collections::BTreeMap;
use std::fmt;

use crate::traits::BuiltinRegistry;
use crate::types::{BuiltinFn, BuiltinResult, Value};

/// In-memory builtin registry backed by `BTreeMap`.
#[derive(Default)]
pub struct Builtins {
    funcs: BTreeMap<String, Box<BuiltinFn>>,
}

impl Builtins {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            funcs: BTreeMap::new(),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> BuiltinResult + Send + Sync + 'static,
    {
        self.insert(name, func);
        self
    }

    /// Register `func` under `name`, replacing any previous registration.
    pub fn insert<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> BuiltinResult + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Box::new(func));
    }

    /// Remove the builtin registered under `name`.
    pub fn remove(&mut self, name: &str) {
        self.funcs.remove(name);
    }

    /// Move every registration from `other` into this registry.
    ///
    /// Entries in `other` override entries with the same name here.
    pub fn extend(&mut self, other: Builtins) {
        self.funcs.extend(other.funcs);
    }

    /// Registered names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    /// Returns the number of registered builtins.
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    /// Returns true if no builtins are registered.
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl BuiltinRegistry for Builtins {
    fn lookup(&self, name: &str) -> Option<&BuiltinFn> {
        self.funcs.get(name).map(|f| f.as_ref())
    }
}

impl fmt::Debug for Builtins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.funcs.keys()).finish()
    }
}
