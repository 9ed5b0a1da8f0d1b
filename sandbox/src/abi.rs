//! The guest ABI: version negotiation, typed exports, and the name/id tables
//! a module publishes about itself.

use std::collections::BTreeMap;

use serde_json::Value;
use wasmtime::{AsContextMut, Instance, TypedFunc, Val, WasmParams, WasmResults};

use crate::error::PolicyError;

/// The only ABI major version this runtime speaks.
pub const ABI_VERSION: i32 = 1;

/// First ABI minor version that offers the single-call `opa_eval` export.
pub const SINGLE_CALL_EVAL_MINOR: i32 = 2;

const ABI_VERSION_GLOBAL: &str = "opa_wasm_abi_version";
const ABI_MINOR_VERSION_GLOBAL: &str = "opa_wasm_abi_minor_version";

/// ABI version a module declares through its exported globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiVersion {
    pub major: i32,
    pub minor: i32,
}

impl AbiVersion {
    /// Read the version globals. `None` if the module predates version negotiation.
    pub fn read(
        mut store: impl AsContextMut,
        instance: &Instance,
    ) -> Result<Option<Self>, PolicyError> {
        let Some(major) = read_i32_global(&mut store, instance, ABI_VERSION_GLOBAL)? else {
            return Ok(None);
        };
        let minor = read_i32_global(&mut store, instance, ABI_MINOR_VERSION_GLOBAL)?.unwrap_or(0);
        Ok(Some(Self { major, minor }))
    }
}

fn read_i32_global(
    mut store: impl AsContextMut,
    instance: &Instance,
    name: &str,
) -> Result<Option<i32>, PolicyError> {
    let Some(global) = instance.get_global(&mut store, name) else {
        return Ok(None);
    };
    match global.get(&mut store) {
        Val::I32(v) => Ok(Some(v)),
        other => Err(PolicyError::InvalidModule(format!(
            "global '{}' must be i32, got {:?}",
            name, other
        ))),
    }
}

/// Look up a typed function export, failing with `InvalidModule`.
pub(crate) fn typed_export<P, R>(
    mut store: impl AsContextMut,
    instance: &Instance,
    name: &str,
) -> Result<TypedFunc<P, R>, PolicyError>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut store, name)
        .map_err(|e| PolicyError::InvalidModule(format!("export '{}': {}", name, e)))
}

/// `opa_eval(reserved, entrypoint, data, input, input_len, heap_ptr, format) -> result`
pub type SingleCallEval = TypedFunc<(i32, i32, i32, i32, i32, i32, i32), i32>;

/// Session-level exports: heap pointer, evaluation context, and table enumeration.
///
/// Value marshalling exports live in [`MemoryBridge`](crate::bridge::MemoryBridge).
#[derive(Clone)]
pub struct Exports {
    pub heap_ptr_get: TypedFunc<(), i32>,
    pub heap_ptr_set: TypedFunc<i32, ()>,
    pub eval_ctx_new: TypedFunc<(), i32>,
    pub eval_ctx_set_input: TypedFunc<(i32, i32), ()>,
    pub eval_ctx_set_data: TypedFunc<(i32, i32), ()>,
    pub eval_ctx_set_entrypoint: TypedFunc<(i32, i32), ()>,
    pub eval_ctx_get_result: TypedFunc<i32, i32>,
    pub eval: TypedFunc<i32, i32>,
    pub builtins: TypedFunc<(), i32>,
    pub entrypoints: TypedFunc<(), i32>,
    /// Present on modules with ABI minor version 2 and later.
    pub single_call_eval: Option<SingleCallEval>,
}

impl Exports {
    pub fn resolve(mut store: impl AsContextMut, instance: &Instance) -> Result<Self, PolicyError> {
        let single_call_eval = match instance.get_func(&mut store, "opa_eval") {
            Some(_) => Some(typed_export(&mut store, instance, "opa_eval")?),
            None => None,
        };
        Ok(Self {
            heap_ptr_get: typed_export(&mut store, instance, "opa_heap_ptr_get")?,
            heap_ptr_set: typed_export(&mut store, instance, "opa_heap_ptr_set")?,
            eval_ctx_new: typed_export(&mut store, instance, "opa_eval_ctx_new")?,
            eval_ctx_set_input: typed_export(&mut store, instance, "opa_eval_ctx_set_input")?,
            eval_ctx_set_data: typed_export(&mut store, instance, "opa_eval_ctx_set_data")?,
            eval_ctx_set_entrypoint: typed_export(
                &mut store,
                instance,
                "opa_eval_ctx_set_entrypoint",
            )?,
            eval_ctx_get_result: typed_export(&mut store, instance, "opa_eval_ctx_get_result")?,
            eval: typed_export(&mut store, instance, "eval")?,
            builtins: typed_export(&mut store, instance, "builtins")?,
            entrypoints: typed_export(&mut store, instance, "entrypoints")?,
            single_call_eval,
        })
    }
}

/// Parse a `{"name": id, ...}` object published by the module.
fn name_id_pairs(value: &Value, what: &str) -> Result<BTreeMap<String, i32>, PolicyError> {
    let object = value.as_object().ok_or_else(|| {
        PolicyError::InvalidModule(format!("{} table must be an object, got {}", what, value))
    })?;
    object
        .iter()
        .map(|(name, id)| {
            id.as_i64()
                .and_then(|id| i32::try_from(id).ok())
                .map(|id| (name.clone(), id))
                .ok_or_else(|| {
                    PolicyError::InvalidModule(format!(
                        "{} '{}' has non-integer id {}",
                        what, name, id
                    ))
                })
        })
        .collect()
}

/// Bidirectional mapping between module-assigned builtin ids and builtin names.
///
/// Built once at load time from the module's `builtins` export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltinTable {
    by_id: BTreeMap<i32, String>,
    by_name: BTreeMap<String, i32>,
}

impl BuiltinTable {
    pub fn from_value(value: &Value) -> Result<Self, PolicyError> {
        let by_name = name_id_pairs(value, "builtin")?;
        let by_id = by_name
            .iter()
            .map(|(name, &id)| (id, name.clone()))
            .collect::<BTreeMap<_, _>>();
        if by_id.len() != by_name.len() {
            return Err(PolicyError::InvalidModule(
                "builtin table assigns one id to several names".into(),
            ));
        }
        Ok(Self { by_id, by_name })
    }

    pub fn name(&self, id: i32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    /// Builtin names the module may call.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Mapping from entrypoint name to the id `opa_eval_ctx_set_entrypoint` accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrypointTable {
    by_name: BTreeMap<String, i32>,
}

impl EntrypointTable {
    pub fn from_value(value: &Value) -> Result<Self, PolicyError> {
        Ok(Self {
            by_name: name_id_pairs(value, "entrypoint")?,
        })
    }

    pub fn id(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    pub fn contains_id(&self, id: i32) -> bool {
        self.by_name.values().any(|&v| v == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.by_name.iter().map(|(name, &id)| (name.as_str(), id))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
