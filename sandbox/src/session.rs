//! Evaluation session — one instantiated policy module and its heap checkpoints.
//!
//! The guest allocates with a bump pointer and never frees. The session
//! reclaims memory in bulk by resetting that pointer to one of two saved
//! checkpoints:
//!
//! - `base_heap_ptr`: right after the empty data document created at load time
//! - `data_heap_ptr`: right after the document installed by the last `set_data`
//!
//! `set_data` rewinds to `base_heap_ptr`, `evaluate` rewinds to
//! `data_heap_ptr`, so repeated evaluations reuse the same memory instead of
//! growing it. Handles from a previous call are invalid after the rewind.

use serde_json::{Map, Value};
use wasmtime::Store;

use crate::abi::{
    AbiVersion, BuiltinTable, EntrypointTable, Exports, SingleCallEval, SINGLE_CALL_EVAL_MINOR,
};
use crate::bridge::MemoryBridge;
use crate::config::PolicyConfig;
use crate::error::{handle_trap, PolicyError};
use crate::host_impl::HostState;

/// Which entrypoint an evaluation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Entrypoint {
    /// The module's default entrypoint.
    #[default]
    Default,
    /// An entrypoint by numeric id.
    Id(i32),
    /// An entrypoint by name, e.g. `"authz/allow"`.
    Name(String),
}

impl From<&str> for Entrypoint {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Entrypoint {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i32> for Entrypoint {
    fn from(id: i32) -> Self {
        Self::Id(id)
    }
}

impl TryFrom<&Value> for Entrypoint {
    type Error = PolicyError;

    /// Select an entrypoint from a dynamically typed value: strings are
    /// names, integers are ids, `null` is the default.
    fn try_from(value: &Value) -> Result<Self, PolicyError> {
        match value {
            Value::Null => Ok(Self::Default),
            Value::String(name) => Ok(Self::Name(name.clone())),
            Value::Number(n) => n
                .as_i64()
                .and_then(|id| i32::try_from(id).ok())
                .map(Self::Id)
                .ok_or_else(|| PolicyError::InvalidEntrypointType(format!("number {}", n))),
            Value::Bool(_) => Err(PolicyError::InvalidEntrypointType("boolean".into())),
            Value::Array(_) => Err(PolicyError::InvalidEntrypointType("array".into())),
            Value::Object(_) => Err(PolicyError::InvalidEntrypointType("object".into())),
        }
    }
}

/// A loaded policy, ready to evaluate.
///
/// Serves one call at a time (`&mut self`); use one `Policy` per concurrent
/// caller. Instances share nothing with each other.
pub struct Policy {
    store: Store<HostState>,
    exports: Exports,
    bridge: MemoryBridge,
    entrypoints: EntrypointTable,
    abi: Option<AbiVersion>,
    config: PolicyConfig,
    /// Handle of the empty document encoded at construction.
    empty_data_addr: i32,
    /// Handle of the current base data document.
    data_addr: i32,
    base_heap_ptr: i32,
    data_heap_ptr: i32,
}

impl Policy {
    pub(crate) fn new(
        mut store: Store<HostState>,
        exports: Exports,
        bridge: MemoryBridge,
        entrypoints: EntrypointTable,
        abi: Option<AbiVersion>,
        config: PolicyConfig,
    ) -> Result<Self, PolicyError> {
        let empty = Value::Object(Map::new());
        let empty_data_addr = bridge.encode(&mut store, Some(&empty))?;
        let base_heap_ptr = handle_trap(exports.heap_ptr_get.call(&mut store, ()))?;

        Ok(Self {
            store,
            exports,
            bridge,
            entrypoints,
            abi,
            config,
            empty_data_addr,
            data_addr: empty_data_addr,
            base_heap_ptr,
            data_heap_ptr: base_heap_ptr,
        })
    }

    /// Replace the base data document every evaluation sees.
    ///
    /// Discards everything allocated by earlier evaluations and `set_data`
    /// calls. If the document cannot be moved into the guest, the policy is
    /// left with an empty data document.
    pub fn set_data(&mut self, document: &Value) -> Result<(), PolicyError> {
        self.begin_call()?;
        self.set_heap_ptr(self.base_heap_ptr)?;

        match self.install_data(document) {
            Ok((addr, heap_ptr)) => {
                self.data_addr = addr;
                self.data_heap_ptr = heap_ptr;
                Ok(())
            }
            Err(e) => {
                self.data_addr = self.empty_data_addr;
                self.data_heap_ptr = self.base_heap_ptr;
                Err(e)
            }
        }
    }

    /// Evaluate the default entrypoint against `input`.
    ///
    /// Returns the result set: an array with one entry per result binding,
    /// empty when the policy produced no definite result.
    pub fn evaluate(&mut self, input: &Value) -> Result<Value, PolicyError> {
        self.evaluate_entrypoint(Some(input), Entrypoint::Default)
    }

    /// Evaluate `entrypoint` against `input`; `None` leaves input undefined.
    pub fn evaluate_entrypoint(
        &mut self,
        input: Option<&Value>,
        entrypoint: impl Into<Entrypoint>,
    ) -> Result<Value, PolicyError> {
        let entrypoint_id = self.resolve_entrypoint(&entrypoint.into())?;
        self.begin_call()?;

        if let Some(single_call_eval) = self.single_call_eval() {
            return self.evaluate_single_call(single_call_eval, input, entrypoint_id);
        }

        self.set_heap_ptr(self.data_heap_ptr)?;
        let input_handle = self.bridge.encode(&mut self.store, input)?;

        let exports = &self.exports;
        let store = &mut self.store;
        let ctx = handle_trap(exports.eval_ctx_new.call(&mut *store, ()))?;
        handle_trap(exports.eval_ctx_set_input.call(&mut *store, (ctx, input_handle)))?;
        handle_trap(exports.eval_ctx_set_data.call(&mut *store, (ctx, self.data_addr)))?;
        if let Some(id) = entrypoint_id {
            handle_trap(exports.eval_ctx_set_entrypoint.call(&mut *store, (ctx, id)))?;
        }

        let code = handle_trap(exports.eval.call(&mut *store, ctx))?;
        if code != 0 {
            return Err(PolicyError::EvalFailed(code));
        }

        let result = handle_trap(exports.eval_ctx_get_result.call(&mut *store, ctx))?;
        if result == 0 {
            return Ok(Value::Array(Vec::new()));
        }
        self.bridge.decode(&mut self.store, result)
    }

    /// Evaluate the default entrypoint and report whether it produced exactly `[true]`.
    #[deprecated(note = "use `evaluate` and inspect the result set")]
    pub fn evaluate_boolean(&mut self, input: &Value) -> Result<bool, PolicyError> {
        let results = self.evaluate(input)?;
        Ok(matches!(results.as_array().map(Vec::as_slice), Some([Value::Bool(true)])))
    }

    /// The ABI version the module declared, if any.
    pub fn abi_version(&self) -> Option<AbiVersion> {
        self.abi
    }

    /// Entrypoints the module exposes.
    pub fn entrypoints(&self) -> &EntrypointTable {
        &self.entrypoints
    }

    /// Builtins the module may call.
    pub fn builtins(&self) -> &BuiltinTable {
        &self.store.data().builtins
    }

    /// Current linear memory size in pages.
    pub fn memory_pages(&self) -> u64 {
        self.bridge.memory().pages(&self.store)
    }

    /// Guest log lines captured during the last call.
    ///
    /// Empty unless `enable_guest_logs` is set.
    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.store.data_mut().logs)
    }

    /// Resolve to the id passed to the guest; `None` keeps the module default.
    fn resolve_entrypoint(&self, entrypoint: &Entrypoint) -> Result<Option<i32>, PolicyError> {
        match entrypoint {
            Entrypoint::Default => Ok(None),
            Entrypoint::Id(id) if self.entrypoints.contains_id(*id) => Ok(Some(*id)),
            Entrypoint::Id(id) => Err(PolicyError::UnknownEntrypointId(*id)),
            Entrypoint::Name(name) => self
                .entrypoints
                .id(name)
                .map(Some)
                .ok_or_else(|| PolicyError::UnknownEntrypoint(name.clone())),
        }
    }

    /// Per-call setup: refill the fuel budget and clear captured logs.
    fn begin_call(&mut self) -> Result<(), PolicyError> {
        if let Some(fuel) = self.config.fuel_limit {
            self.store.set_fuel(fuel)?;
        }
        self.store.data_mut().logs.clear();
        Ok(())
    }

    /// Encode `document` and checkpoint the heap after it.
    ///
    /// Nothing is committed until both steps succeed.
    fn install_data(&mut self, document: &Value) -> Result<(i32, i32), PolicyError> {
        let addr = self.bridge.encode(&mut self.store, Some(document))?;
        let heap_ptr = handle_trap(self.exports.heap_ptr_get.call(&mut self.store, ()))?;
        Ok((addr, heap_ptr))
    }

    fn set_heap_ptr(&mut self, ptr: i32) -> Result<(), PolicyError> {
        tracing::trace!(ptr, "resetting guest heap pointer");
        handle_trap(self.exports.heap_ptr_set.call(&mut self.store, ptr))
    }

    fn single_call_eval(&self) -> Option<SingleCallEval> {
        let minor = self.abi.map(|v| v.minor)?;
        if !self.config.prefer_single_call_eval || minor < SINGLE_CALL_EVAL_MINOR {
            return None;
        }
        self.exports.single_call_eval.clone()
    }

    /// Evaluate through `opa_eval`: the input text goes straight to
    /// `data_heap_ptr` and the guest parses it itself.
    fn evaluate_single_call(
        &mut self,
        single_call_eval: SingleCallEval,
        input: Option<&Value>,
        entrypoint_id: Option<i32>,
    ) -> Result<Value, PolicyError> {
        let text = match input {
            Some(value) => serde_json::to_vec(value)
                .map_err(|e| PolicyError::Serialization(e.to_string()))?,
            None => Vec::new(),
        };
        let input_addr = self.data_heap_ptr;
        let heap_ptr = i32::try_from(input_addr as usize + text.len()).map_err(|_| {
            PolicyError::Serialization(format!("input of {} bytes is too large", text.len()))
        })?;
        let input_len = heap_ptr - input_addr;

        let memory = self.bridge.memory();
        memory.ensure_len(&mut self.store, heap_ptr as usize)?;
        memory.write(&mut self.store, input_addr, &text)?;

        let result_addr = handle_trap(single_call_eval.call(
            &mut self.store,
            (
                0,
                entrypoint_id.unwrap_or(0),
                self.data_addr,
                input_addr,
                input_len,
                heap_ptr,
                0,
            ),
        ))?;
        self.bridge.decode_text(&mut self.store, result_addr)
    }
}
