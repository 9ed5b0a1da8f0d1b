//! WASM module validation — ABI compatibility checks.
//!
//! Validates that a compiled policy module meets the ABI requirements
//! before it is instantiated. Checks:
//!
//! 1. Required exports present with correct signatures
//! 2. All imports come from the `env` module and are ones the host provides
//! 3. No WASI imports
//! 4. Linear memory is imported as `env.memory`, not defined by the module

use wasmtime::{ExternType, FuncType, Module, ValType};

use crate::error::PolicyError;
use crate::linker::{HOST_FUNCTIONS, IMPORT_MODULE};

/// Check if a ValType is i32.
fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Expected export: (name, param_count_of_i32, result_count_of_i32).
/// All params and results are i32 in the policy ABI.
const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[
    ("opa_malloc", 1, 1),
    ("opa_json_parse", 2, 1),
    ("opa_json_dump", 1, 1),
    ("opa_heap_ptr_get", 0, 1),
    ("opa_heap_ptr_set", 1, 0),
    ("opa_eval_ctx_new", 0, 1),
    ("opa_eval_ctx_set_input", 2, 0),
    ("opa_eval_ctx_set_data", 2, 0),
    ("opa_eval_ctx_set_entrypoint", 2, 0),
    ("opa_eval_ctx_get_result", 1, 1),
    ("eval", 1, 1),
    ("builtins", 0, 1),
    ("entrypoints", 0, 1),
];

/// Exports checked only when present.
const OPTIONAL_EXPORTS: &[(&str, usize, usize)] = &[("opa_eval", 7, 1)];

/// Validate that a WASM module meets the policy ABI requirements.
pub fn validate_module(module: &Module) -> Result<(), PolicyError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

/// Check that all required exports are present with correct signatures.
fn validate_exports(module: &Module) -> Result<(), PolicyError> {
    for &(name, expected_param_count, expected_result_count) in REQUIRED_EXPORTS {
        let export = module.get_export(name).ok_or_else(|| {
            PolicyError::InvalidModule(format!("missing required export: {}", name))
        })?;
        check_signature(name, export, expected_param_count, expected_result_count)?;
    }

    for &(name, expected_param_count, expected_result_count) in OPTIONAL_EXPORTS {
        if let Some(export) = module.get_export(name) {
            check_signature(name, export, expected_param_count, expected_result_count)?;
        }
    }

    Ok(())
}

fn check_signature(
    name: &str,
    export: ExternType,
    expected_param_count: usize,
    expected_result_count: usize,
) -> Result<(), PolicyError> {
    let func_ty: FuncType = match export {
        ExternType::Func(ft) => ft,
        _ => {
            return Err(PolicyError::InvalidModule(format!(
                "export '{}' must be a function",
                name
            )));
        }
    };

    let params: Vec<ValType> = func_ty.params().collect();
    let results: Vec<ValType> = func_ty.results().collect();

    if params.len() != expected_param_count || !params.iter().all(is_i32) {
        return Err(PolicyError::InvalidModule(format!(
            "export '{}' has wrong param signature: expected {} i32 params, got {} params",
            name,
            expected_param_count,
            params.len()
        )));
    }

    if results.len() != expected_result_count || !results.iter().all(is_i32) {
        return Err(PolicyError::InvalidModule(format!(
            "export '{}' has wrong result signature: expected {} i32 results, got {} results",
            name,
            expected_result_count,
            results.len()
        )));
    }

    Ok(())
}

/// Check that all imports are host-provided `env` items and none are WASI.
fn validate_imports(module: &Module) -> Result<(), PolicyError> {
    let mut imports_memory = false;

    for import in module.imports() {
        let module_name = import.module();

        // Reject WASI imports
        if module_name.starts_with("wasi") {
            return Err(PolicyError::InvalidModule(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        // All imports must be from env
        if module_name != IMPORT_MODULE {
            return Err(PolicyError::InvalidModule(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                IMPORT_MODULE,
                import.name()
            )));
        }

        match import.ty() {
            ExternType::Memory(_) if import.name() == "memory" => imports_memory = true,
            ExternType::Func(_) if HOST_FUNCTIONS.contains(&import.name()) => {}
            _ => {
                return Err(PolicyError::InvalidModule(format!(
                    "unsupported import: {}::{}",
                    module_name,
                    import.name()
                )));
            }
        }
    }

    if !imports_memory {
        return Err(PolicyError::InvalidModule(
            "module must import 'env.memory'".into(),
        ));
    }

    Ok(())
}
