//! Policy runtime — Wasmtime engine, module loading, and instantiation.
//!
//! `PolicyModule` compiles and validates a module once; each call to
//! [`PolicyModule::instantiate`] produces an independent [`Policy`] with its
//! own store, linear memory, and builtin registry.

use std::sync::Arc;

use regolith_hostapi::BuiltinRegistry;
use wasmtime::{Config, Engine, Linker, Memory, MemoryType, Module, Store};

use crate::abi::{AbiVersion, BuiltinTable, EntrypointTable, Exports, ABI_VERSION};
use crate::bridge::MemoryBridge;
use crate::config::PolicyConfig;
use crate::error::{handle_trap, PolicyError};
use crate::host_impl::HostState;
use crate::linker::{register_host_functions, IMPORT_MODULE};
use crate::memory::LinearMemory;
use crate::session::Policy;
use crate::validation::validate_module;

/// A compiled, validated policy module.
///
/// Cheap to keep around; instantiate it once per concurrent caller.
#[derive(Clone)]
pub struct PolicyModule {
    engine: Engine,
    module: Module,
    config: PolicyConfig,
}

impl PolicyModule {
    /// Compile a policy module from WASM bytecode.
    ///
    /// Validates the module's exports and imports before accepting.
    pub fn new(wasm_bytes: &[u8], config: PolicyConfig) -> Result<Self, PolicyError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)
            .map_err(|e| PolicyError::ModuleLoad(format!("{:#}", e)))?;
        Self::from_module(module, config)
    }

    /// Wrap an already compiled module.
    ///
    /// The module's engine is reused; it must have been created with fuel
    /// metering enabled if `config.fuel_limit` is set.
    pub fn from_module(module: Module, config: PolicyConfig) -> Result<Self, PolicyError> {
        validate_module(&module)?;
        tracing::debug!(
            exports = module.exports().count(),
            imports = module.imports().count(),
            "policy module compiled"
        );
        Ok(Self {
            engine: module.engine().clone(),
            module,
            config,
        })
    }

    /// The engine this module was compiled with.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Instantiate the module with `registry` answering its builtin calls.
    pub fn instantiate(&self, registry: Arc<dyn BuiltinRegistry>) -> Result<Policy, PolicyError> {
        // 1. Create store and host-owned linear memory
        let mut store = Store::new(&self.engine, HostState::new(registry, &self.config));
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        let memory_type = MemoryType::new(
            self.config.initial_memory_pages,
            Some(self.config.max_memory_pages),
        );
        let raw_memory = Memory::new(&mut store, memory_type)
            .map_err(|e| PolicyError::ModuleLoad(format!("linear memory: {:#}", e)))?;
        let memory = LinearMemory::new(raw_memory);
        store.data_mut().memory = Some(memory);

        // 2. Create linker, register host functions, instantiate
        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;
        linker.define(&store, IMPORT_MODULE, "memory", raw_memory)?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| PolicyError::ModuleLoad(format!("{:#}", e)))?;

        // 3. Negotiate ABI version
        let abi = AbiVersion::read(&mut store, &instance)?;
        match abi {
            Some(version) if version.major != ABI_VERSION => {
                return Err(PolicyError::UnsupportedAbi(version.major));
            }
            Some(_) => {}
            None => tracing::warn!(
                expected = ABI_VERSION,
                "policy module exports no ABI version; assuming a compatible legacy module"
            ),
        }

        // 4. Resolve exports and wire the bridge into host state
        let exports = Exports::resolve(&mut store, &instance)?;
        let bridge = MemoryBridge::resolve(&mut store, &instance, memory)?;
        store.data_mut().bridge = Some(bridge.clone());

        // 5. Builtin and entrypoint tables
        let builtins_handle = handle_trap(exports.builtins.call(&mut store, ()))?;
        let builtins = BuiltinTable::from_value(&bridge.decode(&mut store, builtins_handle)?)?;
        let entrypoints_handle = handle_trap(exports.entrypoints.call(&mut store, ()))?;
        let entrypoints =
            EntrypointTable::from_value(&bridge.decode(&mut store, entrypoints_handle)?)?;

        for name in builtins.names() {
            if !store.data().registry.contains(name) {
                tracing::debug!(builtin = name, "module references an unregistered builtin");
            }
        }

        tracing::debug!(
            abi = ?abi,
            builtins = builtins.len(),
            entrypoints = entrypoints.len(),
            "policy module instantiated"
        );
        store.data_mut().builtins = builtins;

        Policy::new(store, exports, bridge, entrypoints, abi, self.config.clone())
    }
}

/// Compile, validate, and instantiate a policy module in one step.
pub fn load(
    wasm_bytes: &[u8],
    registry: Arc<dyn BuiltinRegistry>,
    config: PolicyConfig,
) -> Result<Policy, PolicyError> {
    PolicyModule::new(wasm_bytes, config)?.instantiate(registry)
}

/// Create a Wasmtime engine for policy evaluation.
fn create_engine(config: &PolicyConfig) -> Result<Engine, PolicyError> {
    let mut wasm_config = Config::new();

    // Fuel metering only when a budget is configured
    wasm_config.consume_fuel(config.fuel_limit.is_some());

    // One memory, no shared state between instances
    wasm_config.wasm_threads(false);
    wasm_config.wasm_multi_memory(false);
    wasm_config.cranelift_nan_canonicalization(true);

    Ok(Engine::new(&wasm_config)?)
}
