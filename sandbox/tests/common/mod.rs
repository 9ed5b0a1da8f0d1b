//! Shared test helpers for integration tests.
//!
//! Provides a builder for small hand-written policy modules in WAT text,
//! plus registry and loading helpers used across all integration test files.
//!
//! The generated guest keeps values as null-terminated JSON text: a handle
//! is the address of that text, `opa_json_parse` copies its input into a
//! fresh allocation, and `opa_json_dump` returns the handle unchanged.

#![allow(dead_code)]

use std::sync::Arc;

use regolith_hostapi::{expect_arity, BuiltinRegistry, Builtins};
use regolith_sandbox::{Policy, PolicyConfig, PolicyError, PolicyModule};
use serde_json::{json, Value};

/// First address used for static strings. Everything below stays zero.
const STATIC_BASE: u32 = 1024;

/// Start of the guest heap (page 1).
const HEAP_BASE: u32 = 65536;

// ── Policy Module Builder ──

/// Builds a policy module speaking the ABI from a few pluggable pieces.
///
/// Function bodies can call these helpers:
/// - `$input`, `$data`, `$entrypoint` (ctx) read eval context fields
/// - `$set_result` (ctx, handle) stores the result handle
/// - `$streq` (a, b) compares two null-terminated strings
/// - `$builtin0`..`$builtin4`, `$abort`, `$println` are the host imports
pub struct PolicyWat {
    abi: Option<(i32, i32)>,
    builtins: Value,
    entrypoints: Value,
    eval_body: String,
    strings: Vec<(u32, String)>,
    next_addr: u32,
    single_call_eval: bool,
    parse_limit: Option<u32>,
    heap_ptr_limit: Option<u32>,
}

impl Default for PolicyWat {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyWat {
    pub fn new() -> Self {
        Self {
            abi: Some((1, 1)),
            builtins: json!({}),
            entrypoints: json!({}),
            eval_body: String::new(),
            strings: Vec::new(),
            next_addr: STATIC_BASE,
            single_call_eval: false,
            parse_limit: None,
            heap_ptr_limit: None,
        }
    }

    /// Declare ABI version `major.minor` through the exported globals.
    pub fn abi(mut self, major: i32, minor: i32) -> Self {
        self.abi = Some((major, minor));
        self
    }

    /// Omit the ABI version globals entirely.
    pub fn without_abi(mut self) -> Self {
        self.abi = None;
        self
    }

    /// The `{"name": id}` table returned by the `builtins` export.
    pub fn builtins(mut self, table: Value) -> Self {
        self.builtins = table;
        self
    }

    /// The `{"name": id}` table returned by the `entrypoints` export.
    pub fn entrypoints(mut self, table: Value) -> Self {
        self.entrypoints = table;
        self
    }

    /// Body of `eval`; the context address is in `$ctx`.
    pub fn eval(mut self, body: impl Into<String>) -> Self {
        self.eval_body = body.into();
        self
    }

    /// Export `opa_eval` (echoing its input) and declare ABI 1.2.
    pub fn single_call_eval(mut self) -> Self {
        self.single_call_eval = true;
        self.abi = Some((1, 2));
        self
    }

    /// Make `opa_json_parse` fail for text longer than `len` bytes.
    pub fn parse_limit(mut self, len: u32) -> Self {
        self.parse_limit = Some(len);
        self
    }

    /// Make `opa_heap_ptr_get` trap once the heap pointer is past `addr`.
    pub fn heap_ptr_limit(mut self, addr: u32) -> Self {
        self.heap_ptr_limit = Some(addr);
        self
    }

    /// Place a null-terminated string in static memory and return its address.
    pub fn string(&mut self, text: &str) -> u32 {
        let addr = self.next_addr;
        self.strings.push((addr, text.to_string()));
        // Keep every string 8-byte aligned.
        self.next_addr += (text.len() as u32 + 1 + 7) & !7;
        assert!(self.next_addr < HEAP_BASE, "static strings overflow the heap");
        addr
    }

    /// Render the module as WAT text.
    pub fn build(&self) -> String {
        let mut strings = self.strings.clone();
        let mut next = self.next_addr;
        let mut place = |text: String| {
            let addr = next;
            next += (text.len() as u32 + 1 + 7) & !7;
            strings.push((addr, text));
            addr
        };
        let builtins_addr = place(self.builtins.to_string());
        let entrypoints_addr = place(self.entrypoints.to_string());
        assert!(next < HEAP_BASE, "static strings overflow the heap");

        let mut wat = String::from("(module\n");
        wat.push_str(IMPORTS);

        if let Some((major, minor)) = self.abi {
            wat.push_str(&format!(
                "  (global (export \"opa_wasm_abi_version\") i32 (i32.const {major}))\n"
            ));
            wat.push_str(&format!(
                "  (global (export \"opa_wasm_abi_minor_version\") i32 (i32.const {minor}))\n"
            ));
        }

        wat.push_str(&format!(
            "  (global $heap (mut i32) (i32.const {HEAP_BASE}))\n"
        ));
        wat.push_str(RUNTIME);

        match self.parse_limit {
            None => wat.push_str(JSON_PARSE),
            Some(limit) => wat.push_str(&format!(
                r#"
  (func (export "opa_json_parse") (param $addr i32) (param $len i32) (result i32)
    (if (i32.gt_u (local.get $len) (i32.const {limit}))
      (then (return (i32.const 0))))
    (call $copy_text (local.get $addr) (local.get $len)))
"#
            )),
        }

        let heap_ptr_check = match self.heap_ptr_limit {
            None => String::new(),
            Some(limit) => format!(
                "(if (i32.gt_u (global.get $heap) (i32.const {limit})) (then unreachable))"
            ),
        };
        wat.push_str(&format!(
            r#"
  (func (export "opa_heap_ptr_get") (result i32)
    {heap_ptr_check}
    (global.get $heap))
"#
        ));

        wat.push_str(&format!(
            r#"
  (func (export "builtins") (result i32) (i32.const {builtins_addr}))
  (func (export "entrypoints") (result i32) (i32.const {entrypoints_addr}))
  (func (export "eval") (param $ctx i32) (result i32)
    {body}
    (i32.const 0))
"#,
            body = self.eval_body
        ));

        if self.single_call_eval {
            wat.push_str(SINGLE_CALL_EVAL);
        }

        for (addr, text) in &strings {
            wat.push_str(&format!(
                "  (data (i32.const {addr}) \"{}\\00\")\n",
                escape_wat(text)
            ));
        }

        wat.push_str(")\n");
        wat
    }

    /// Compile the module with `config`.
    pub fn compile_with(&self, config: PolicyConfig) -> Result<PolicyModule, PolicyError> {
        PolicyModule::new(self.build().as_bytes(), config)
    }

    /// Compile and instantiate with the default config.
    pub fn load(&self, registry: Builtins) -> Result<Policy, PolicyError> {
        self.load_with(registry, PolicyConfig::default())
    }

    /// Compile and instantiate with `config`.
    pub fn load_with(&self, registry: Builtins, config: PolicyConfig) -> Result<Policy, PolicyError> {
        regolith_sandbox::load(self.build().as_bytes(), shared(registry), config)
    }
}

/// Escape arbitrary text for a WAT string literal.
fn escape_wat(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for &b in text.as_bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:02x}", b)),
        }
    }
    out
}

const IMPORTS: &str = r#"
  (import "env" "memory" (memory 2))
  (import "env" "opa_abort" (func $abort (param i32)))
  (import "env" "opa_println" (func $println (param i32)))
  (import "env" "opa_builtin0" (func $builtin0 (param i32 i32) (result i32)))
  (import "env" "opa_builtin1" (func $builtin1 (param i32 i32 i32) (result i32)))
  (import "env" "opa_builtin2" (func $builtin2 (param i32 i32 i32 i32) (result i32)))
  (import "env" "opa_builtin3" (func $builtin3 (param i32 i32 i32 i32 i32) (result i32)))
  (import "env" "opa_builtin4" (func $builtin4 (param i32 i32 i32 i32 i32 i32) (result i32)))
"#;

/// Bump allocator, heap pointer, eval context, and string helpers.
const RUNTIME: &str = r#"
  (func $malloc (export "opa_malloc") (param $size i32) (result i32)
    (local $addr i32)
    (local $end i32)
    (local $limit i32)
    (local.set $addr (global.get $heap))
    (local.set $end (i32.add (local.get $addr) (local.get $size)))
    (local.set $limit (i32.mul (memory.size) (i32.const 65536)))
    (if (i32.gt_u (local.get $end) (local.get $limit))
      (then
        (if (i32.eq
              (memory.grow
                (i32.add
                  (i32.shr_u (i32.sub (local.get $end) (local.get $limit)) (i32.const 16))
                  (i32.const 1)))
              (i32.const -1))
          (then unreachable))))
    (global.set $heap (local.get $end))
    (local.get $addr))

  (func $copy_text (param $addr i32) (param $len i32) (result i32)
    (local $copy i32)
    (local.set $copy (call $malloc (i32.add (local.get $len) (i32.const 1))))
    (memory.copy (local.get $copy) (local.get $addr) (local.get $len))
    (i32.store8 (i32.add (local.get $copy) (local.get $len)) (i32.const 0))
    (local.get $copy))

  (func (export "opa_json_dump") (param $handle i32) (result i32)
    (local.get $handle))

  (func (export "opa_heap_ptr_set") (param $ptr i32)
    (global.set $heap (local.get $ptr)))

  (func (export "opa_eval_ctx_new") (result i32)
    (local $ctx i32)
    (local.set $ctx (call $malloc (i32.const 16)))
    (i32.store (local.get $ctx) (i32.const 0))
    (i32.store offset=4 (local.get $ctx) (i32.const 0))
    (i32.store offset=8 (local.get $ctx) (i32.const 0))
    (i32.store offset=12 (local.get $ctx) (i32.const 0))
    (local.get $ctx))

  (func (export "opa_eval_ctx_set_input") (param $ctx i32) (param $v i32)
    (i32.store (local.get $ctx) (local.get $v)))

  (func (export "opa_eval_ctx_set_data") (param $ctx i32) (param $v i32)
    (i32.store offset=4 (local.get $ctx) (local.get $v)))

  (func (export "opa_eval_ctx_set_entrypoint") (param $ctx i32) (param $v i32)
    (i32.store offset=8 (local.get $ctx) (local.get $v)))

  (func (export "opa_eval_ctx_get_result") (param $ctx i32) (result i32)
    (i32.load offset=12 (local.get $ctx)))

  (func $input (param $ctx i32) (result i32)
    (i32.load (local.get $ctx)))

  (func $data (param $ctx i32) (result i32)
    (i32.load offset=4 (local.get $ctx)))

  (func $entrypoint (param $ctx i32) (result i32)
    (i32.load offset=8 (local.get $ctx)))

  (func $set_result (param $ctx i32) (param $v i32)
    (i32.store offset=12 (local.get $ctx) (local.get $v)))

  (func $streq (param $a i32) (param $b i32) (result i32)
    (local $c i32)
    (block $differ
      (loop $next
        (local.set $c (i32.load8_u (local.get $a)))
        (br_if $differ (i32.ne (local.get $c) (i32.load8_u (local.get $b))))
        (if (i32.eqz (local.get $c))
          (then (return (i32.const 1))))
        (local.set $a (i32.add (local.get $a) (i32.const 1)))
        (local.set $b (i32.add (local.get $b) (i32.const 1)))
        (br $next)))
    (i32.const 0))
"#;

const JSON_PARSE: &str = r#"
  (func (export "opa_json_parse") (param $addr i32) (param $len i32) (result i32)
    (call $copy_text (local.get $addr) (local.get $len)))
"#;

/// `opa_eval` that returns its input text unchanged.
const SINGLE_CALL_EVAL: &str = r#"
  (func (export "opa_eval")
    (param $reserved i32) (param $entrypoint i32) (param $data i32)
    (param $input i32) (param $input_len i32) (param $heap_ptr i32) (param $format i32)
    (result i32)
    (global.set $heap (local.get $heap_ptr))
    (call $copy_text (local.get $input) (local.get $input_len)))
"#;

// ── Eval Bodies ──

/// `eval` body that always yields the result at `addr`.
pub fn yield_static(addr: u32) -> String {
    format!("(call $set_result (local.get $ctx) (i32.const {addr}))")
}

/// `eval` body that yields `then` if the input text equals the string at
/// `expected`, `otherwise` if not.
pub fn yield_if_input_is(expected: u32, then: u32, otherwise: u32) -> String {
    format!(
        "(call $set_result (local.get $ctx)
           (select (i32.const {then}) (i32.const {otherwise})
             (call $streq (call $input (local.get $ctx)) (i32.const {expected}))))"
    )
}

/// `eval` body that yields the input value itself.
pub fn echo_input() -> String {
    "(call $set_result (local.get $ctx) (call $input (local.get $ctx)))".to_string()
}

// ── Policies ──

/// A policy whose default entrypoint always yields `[true]`.
pub fn always_allow() -> PolicyWat {
    let mut wat = PolicyWat::new();
    let allow = wat.string("[true]");
    wat.eval(yield_static(allow))
}

/// A policy yielding `[true]` for input `"admin"` and `[]` otherwise.
pub fn admin_only() -> PolicyWat {
    let mut wat = PolicyWat::new();
    let admin = wat.string(r#""admin""#);
    let allow = wat.string("[true]");
    let undefined = wat.string("[]");
    wat.eval(yield_if_input_is(admin, allow, undefined))
}

/// A policy whose result is its input.
pub fn echo() -> PolicyWat {
    PolicyWat::new().eval(echo_input())
}

/// A policy asking builtin `test.member` whether the input is a key of data.
pub fn data_membership() -> PolicyWat {
    PolicyWat::new()
        .builtins(json!({"test.member": 0}))
        .eval(
            "(call $set_result (local.get $ctx)
               (call $builtin2 (i32.const 0) (i32.const 0)
                 (call $data (local.get $ctx))
                 (call $input (local.get $ctx))))",
        )
}

// ── Registries ──

/// Wrap a registry for `load`.
pub fn shared(registry: Builtins) -> Arc<dyn BuiltinRegistry> {
    Arc::new(registry)
}

/// `test.member(data, key)`: `[true]` if `key` is a string key of `data`.
pub fn membership_builtins() -> Builtins {
    Builtins::new().with("test.member", |args| {
        expect_arity(args, 2)?;
        let found = match (&args[0], &args[1]) {
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        };
        Ok(Some(json!([found])))
    })
}
