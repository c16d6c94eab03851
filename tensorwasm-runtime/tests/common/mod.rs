//! Common test utilities for integration tests.
//!
//! `mock_module` builds a small wasm32 runtime module in WAT that speaks the
//! packed-function C API. It keeps just enough state to exercise every
//! bridge path:
//!
//! - a bump allocator that grows memory on demand
//! - a global function registry seeded by `_initialize`
//! - host function handles (`1000 + resource`) with reference counts that
//!   call the finalizer import when they reach zero
//! - tensors laid out as wasm32 tensor headers
//! - an identity graph executor (`tvm.graph_runtime.create`)
//! - `testing.*` helpers for echo, callbacks, malformed calls, failures and
//!   async replies

#![allow(dead_code)]

use std::sync::Arc;
use tensorwasm_runtime::{Imports, Instance, RuntimeConfig, WasmRuntime};

/// First eight bytes of a valid parameter blob.
pub const PARAMS_MAGIC: u64 = 0xF7E5_8D4F_0504_9CB7;

/// Name of the only graph input.
pub const INPUT_NAME: &str = "data";

/// Graph description handed to the executor. The mock ignores its content.
pub const GRAPH_JSON: &str = r#"{"nodes": [{"op": "null", "name": "data"}], "heads": [[0, 0, 0]]}"#;

/// Where the mock's linear memory comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySource {
    /// `(memory (export "memory") ...)`
    Exported,
    /// `(import "env" "memory" ...)`
    Imported,
}

/// WAT source of the mock runtime module.
pub fn mock_wat(memory: MemorySource) -> String {
    let memory_decl = match memory {
        MemorySource::Exported => r#"(memory (export "memory") 64)"#,
        MemorySource::Imported => r#"(import "env" "memory" (memory 64))"#,
    };
    MOCK_WAT.replace("{MEMORY}", memory_decl)
}

/// Compiled mock runtime module.
pub fn mock_module() -> Vec<u8> {
    wat::parse_str(mock_wat(MemorySource::Exported)).expect("Failed to parse mock WAT")
}

/// Mock module importing its memory from `env`.
pub fn mock_module_imported_memory() -> Vec<u8> {
    wat::parse_str(mock_wat(MemorySource::Imported)).expect("Failed to parse mock WAT")
}

/// A valid parameter blob.
pub fn params_blob() -> Vec<u8> {
    let mut blob = PARAMS_MAGIC.to_le_bytes().to_vec();
    blob.extend_from_slice(&[0u8; 24]);
    blob
}

/// Runtime with default configuration.
pub fn runtime() -> Arc<WasmRuntime> {
    Arc::new(WasmRuntime::with_defaults().expect("Failed to create runtime"))
}

/// Runtime with the given configuration.
pub fn runtime_with(config: RuntimeConfig) -> Arc<WasmRuntime> {
    Arc::new(WasmRuntime::new(config).expect("Failed to create runtime"))
}

/// A fresh instance of the mock module.
pub fn instance() -> Instance {
    instance_on(&runtime())
}

/// A fresh instance of the mock module on `runtime`.
pub fn instance_on(runtime: &WasmRuntime) -> Instance {
    Instance::from_bytes(runtime, "mock", &mock_module(), Imports::new())
        .expect("Failed to instantiate mock module")
}

const MOCK_WAT: &str = r#"
(module
  (import "env" "TVMWasmPackedCFunc"
    (func $packed_cfunc (param i32 i32 i32 i32 i32) (result i32)))
  (import "env" "TVMWasmPackedCFuncFinalizer"
    (func $finalizer (param i32)))
  {MEMORY}

  ;; 1024..      static strings, 64 bytes apart
  ;; 4096..8192  reference counts of host handles, by resource id
  ;; 8192..8704  global registry entries {name, handle}
  ;; 8704..8960  name array for TVMFuncListGlobalNames
  ;; 9216..9728  return slots for nested host calls
  ;; 9728..9752  argument slots for testing.call_async and testing.call_bad
  ;; 9792..10048 "__async.<name>" buffer
  ;; 16384..     heap
  (global $heap (mut i32) (i32.const 16384))
  (global $last_error (mut i32) (i32.const 0))
  (global $nglobals (mut i32) (i32.const 0))
  (global $ret_sp (mut i32) (i32.const 9216))
  (global $initialized (mut i32) (i32.const 0))
  (global $g_input (mut i32) (i32.const 0))
  (global $g_output (mut i32) (i32.const 0))
  (global $g_loaded (mut i32) (i32.const 0))
  (global $reply_status (mut i64) (i64.const 0))
  (global $reply_value (mut i64) (i64.const 0))
  (global $reply_code (mut i32) (i32.const 4))
  (global $reply_count (mut i32) (i32.const 0))

  (data (i32.const 1024) "runtime.SystemLib\00")
  (data (i32.const 1088) "tvm.graph_runtime.create\00")
  (data (i32.const 1152) "testing.echo\00")
  (data (i32.const 1216) "testing.call\00")
  (data (i32.const 1280) "testing.call_async\00")
  (data (i32.const 1344) "testing.reply_status\00")
  (data (i32.const 1408) "testing.last_reply\00")
  (data (i32.const 1472) "testing.reply_count\00")
  (data (i32.const 1536) "testing.fail\00")
  (data (i32.const 1600) "set_input\00")
  (data (i32.const 1664) "run\00")
  (data (i32.const 1728) "get_output\00")
  (data (i32.const 1792) "load_params\00")
  (data (i32.const 1856) "data\00")
  (data (i32.const 1920) "__async.\00")
  (data (i32.const 1984) "mock failure\00")
  (data (i32.const 2048) "invalid parameters file format\00")
  (data (i32.const 2112) "global function already registered\00")
  (data (i32.const 2176) "global function not found\00")
  (data (i32.const 2240) "unknown input\00")
  (data (i32.const 2304) "input not set\00")
  (data (i32.const 2368) "byte length mismatch\00")
  (data (i32.const 2432) "invalid module\00")
  (data (i32.const 2496) "invalid handle\00")
  (data (i32.const 2560) "output index out of range\00")
  (data (i32.const 2624) "testing.call_bad\00")

  ;; ---------------------------------------------------------------- helpers

  (func $alloc (param $size i32) (result i32)
    (local $ptr i32) (local $end i32) (local $have i32)
    (local.set $ptr (i32.and (i32.add (global.get $heap) (i32.const 7)) (i32.const -8)))
    (local.set $end (i32.add (local.get $ptr) (local.get $size)))
    (local.set $have (i32.mul (memory.size) (i32.const 65536)))
    (if (i32.gt_u (local.get $end) (local.get $have))
      (then
        (if (i32.eq
              (memory.grow
                (i32.shr_u
                  (i32.add (i32.sub (local.get $end) (local.get $have)) (i32.const 65535))
                  (i32.const 16)))
              (i32.const -1))
          (then (return (i32.const 0))))))
    (global.set $heap (local.get $end))
    (local.get $ptr))

  (func $fail (param $msg i32) (result i32)
    (global.set $last_error (local.get $msg))
    (i32.const -1))

  (func $strlen (param $p i32) (result i32)
    (local $n i32)
    (block $done
      (loop $next
        (br_if $done (i32.eqz (i32.load8_u (i32.add (local.get $p) (local.get $n)))))
        (local.set $n (i32.add (local.get $n) (i32.const 1)))
        (br $next)))
    (local.get $n))

  (func $streq (param $a i32) (param $b i32) (result i32)
    (local $ca i32) (local $cb i32)
    (loop $next
      (local.set $ca (i32.load8_u (local.get $a)))
      (local.set $cb (i32.load8_u (local.get $b)))
      (if (i32.ne (local.get $ca) (local.get $cb)) (then (return (i32.const 0))))
      (if (i32.eqz (local.get $ca)) (then (return (i32.const 1))))
      (local.set $a (i32.add (local.get $a) (i32.const 1)))
      (local.set $b (i32.add (local.get $b) (i32.const 1)))
      (br $next))
    (unreachable))

  (func $strdup (param $p i32) (result i32)
    (local $n i32) (local $q i32)
    (local.set $n (i32.add (call $strlen (local.get $p)) (i32.const 1)))
    (local.set $q (call $alloc (local.get $n)))
    (memory.copy (local.get $q) (local.get $p) (local.get $n))
    (local.get $q))

  ;; copy a {data, size} byte array and its payload onto the heap
  (func $bytesdup (param $h i32) (result i32)
    (local $size i32) (local $q i32)
    (local.set $size (i32.load offset=4 (local.get $h)))
    (local.set $q (call $alloc (i32.add (local.get $size) (i32.const 8))))
    (i32.store (local.get $q) (i32.add (local.get $q) (i32.const 8)))
    (i32.store offset=4 (local.get $q) (local.get $size))
    (memory.copy
      (i32.add (local.get $q) (i32.const 8))
      (i32.load (local.get $h))
      (local.get $size))
    (local.get $q))

  (func $rc_addr (param $h i32) (result i32)
    (i32.add (i32.const 4096) (i32.shl (i32.sub (local.get $h) (i32.const 1000)) (i32.const 2))))

  (func $rc_inc (param $h i32)
    (if (i32.ge_u (local.get $h) (i32.const 1000))
      (then
        (i32.store (call $rc_addr (local.get $h))
          (i32.add (i32.load (call $rc_addr (local.get $h))) (i32.const 1))))))

  (func $rc_dec (param $h i32)
    (local $addr i32) (local $rc i32)
    (if (i32.lt_u (local.get $h) (i32.const 1000)) (then (return)))
    (local.set $addr (call $rc_addr (local.get $h)))
    (local.set $rc (i32.sub (i32.load (local.get $addr)) (i32.const 1)))
    (i32.store (local.get $addr) (local.get $rc))
    (if (i32.eqz (local.get $rc))
      (then (call $finalizer (i32.sub (local.get $h) (i32.const 1000))))))

  ;; registry entry for name, or 0
  (func $lookup (param $name i32) (result i32)
    (local $i i32) (local $entry i32)
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (global.get $nglobals)))
        (local.set $entry (i32.add (i32.const 8192) (i32.shl (local.get $i) (i32.const 3))))
        (if (call $streq (i32.load (local.get $entry)) (local.get $name))
          (then (return (local.get $entry))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (i32.const 0))

  (func $add_global (param $name i32) (param $h i32)
    (local $entry i32)
    (local.set $entry (i32.add (i32.const 8192) (i32.shl (global.get $nglobals) (i32.const 3))))
    (i32.store (local.get $entry) (local.get $name))
    (i32.store offset=4 (local.get $entry) (local.get $h))
    (global.set $nglobals (i32.add (global.get $nglobals) (i32.const 1))))

  ;; storage bytes of a tensor header
  (func $nbytes (param $h i32) (result i32)
    (local $i i32) (local $n i32) (local $ndim i32) (local $shape i32)
    (local.set $n (i32.const 1))
    (local.set $ndim (i32.load offset=12 (local.get $h)))
    (local.set $shape (i32.load offset=20 (local.get $h)))
    (block $done
      (loop $next
        (br_if $done (i32.ge_s (local.get $i) (local.get $ndim)))
        (local.set $n
          (i32.mul (local.get $n)
            (i32.wrap_i64
              (i64.load (i32.add (local.get $shape) (i32.shl (local.get $i) (i32.const 3)))))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (i32.shr_u
      (i32.add
        (i32.mul (local.get $n)
          (i32.mul
            (i32.load8_u offset=17 (local.get $h))
            (i32.load16_u offset=18 (local.get $h))))
        (i32.const 7))
      (i32.const 3)))

  (func $data (param $h i32) (result i32)
    (i32.add (i32.load (local.get $h)) (i32.wrap_i64 (i64.load offset=32 (local.get $h)))))

  (func (export "_initialize")
    (if (global.get $initialized) (then (return)))
    (global.set $initialized (i32.const 1))
    (call $add_global (i32.const 1024) (i32.const 1))
    (call $add_global (i32.const 1088) (i32.const 2))
    (call $add_global (i32.const 1152) (i32.const 3))
    (call $add_global (i32.const 1216) (i32.const 4))
    (call $add_global (i32.const 1280) (i32.const 5))
    (call $add_global (i32.const 1344) (i32.const 6))
    (call $add_global (i32.const 1408) (i32.const 8))
    (call $add_global (i32.const 1472) (i32.const 9))
    (call $add_global (i32.const 1536) (i32.const 10))
    (call $add_global (i32.const 2624) (i32.const 15)))

  ;; ------------------------------------------------------------- C API

  (func (export "TVMWasmAllocSpace") (param $size i32) (result i32)
    (call $alloc (local.get $size)))

  (func (export "TVMWasmFreeSpace") (param $ptr i32))

  (func (export "TVMGetLastError") (result i32)
    (global.get $last_error))

  (func (export "TVMFuncFree") (param $h i32) (result i32)
    (call $rc_dec (local.get $h))
    (i32.const 0))

  (func (export "TVMWasmFuncCreateFromCFunc") (param $resource i32) (param $out i32) (result i32)
    (i32.store (call $rc_addr (i32.add (local.get $resource) (i32.const 1000))) (i32.const 1))
    (i32.store (local.get $out) (i32.add (local.get $resource) (i32.const 1000)))
    (i32.const 0))

  (func (export "TVMFuncGetGlobal") (param $name i32) (param $out i32) (result i32)
    (local $entry i32) (local $h i32)
    (local.set $entry (call $lookup (local.get $name)))
    (if (local.get $entry)
      (then
        (local.set $h (i32.load offset=4 (local.get $entry)))
        (call $rc_inc (local.get $h))))
    (i32.store (local.get $out) (local.get $h))
    (i32.const 0))

  (func (export "TVMFuncRegisterGlobal")
    (param $name i32) (param $h i32) (param $override i32) (result i32)
    (local $entry i32)
    (local.set $entry (call $lookup (local.get $name)))
    (if (local.get $entry)
      (then
        (if (i32.eqz (local.get $override))
          (then (return (call $fail (i32.const 2112)))))
        (call $rc_inc (local.get $h))
        (call $rc_dec (i32.load offset=4 (local.get $entry)))
        (i32.store offset=4 (local.get $entry) (local.get $h))
        (return (i32.const 0))))
    (call $rc_inc (local.get $h))
    (call $add_global (call $strdup (local.get $name)) (local.get $h))
    (i32.const 0))

  (func (export "TVMFuncListGlobalNames") (param $out_size i32) (param $out_array i32) (result i32)
    (local $i i32)
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (global.get $nglobals)))
        (i32.store
          (i32.add (i32.const 8704) (i32.shl (local.get $i) (i32.const 2)))
          (i32.load (i32.add (i32.const 8192) (i32.shl (local.get $i) (i32.const 3)))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (i32.store (local.get $out_size) (global.get $nglobals))
    (i32.store (local.get $out_array) (i32.const 8704))
    (i32.const 0))

  (func (export "TVMCbArgToReturn") (param $value i32) (param $code i32) (result i32)
    (local $c i32)
    (local.set $c (i32.load (local.get $code)))
    (if (i32.eq (local.get $c) (i32.const 14))
      (then (i32.store (local.get $code) (i32.const 8))))
    (if (i32.eq (local.get $c) (i32.const 10))
      (then (call $rc_inc (i32.load (local.get $value)))))
    (i32.const 0))

  (func (export "TVMCFuncSetReturn")
    (param $ret i32) (param $value i32) (param $code i32) (param $n i32) (result i32)
    (local $c i32) (local $v i64)
    (local.set $c (i32.load (local.get $code)))
    (local.set $v (i64.load (local.get $value)))
    (if (i32.eq (local.get $c) (i32.const 11))
      (then
        (local.set $v (i64.extend_i32_u (call $strdup (i32.wrap_i64 (local.get $v)))))))
    (if (i32.eq (local.get $c) (i32.const 12))
      (then
        (local.set $v (i64.extend_i32_u (call $bytesdup (i32.wrap_i64 (local.get $v)))))))
    (if (i32.eq (local.get $c) (i32.const 10))
      (then (call $rc_inc (i32.wrap_i64 (local.get $v)))))
    (i64.store (local.get $ret) (local.get $v))
    (i32.store offset=8 (local.get $ret) (local.get $c))
    (i32.const 0))

  (func (export "TVMModGetFunction")
    (param $mod i32) (param $name i32) (param $query i32) (param $out i32) (result i32)
    (local $h i32)
    (if (i32.and
          (i32.ne (local.get $mod) (i32.const 100))
          (i32.ne (local.get $mod) (i32.const 200)))
      (then (return (call $fail (i32.const 2432)))))
    (if (i32.eq (local.get $mod) (i32.const 200))
      (then
        (if (call $streq (local.get $name) (i32.const 1600)) (then (local.set $h (i32.const 11))))
        (if (call $streq (local.get $name) (i32.const 1664)) (then (local.set $h (i32.const 12))))
        (if (call $streq (local.get $name) (i32.const 1728)) (then (local.set $h (i32.const 13))))
        (if (call $streq (local.get $name) (i32.const 1792)) (then (local.set $h (i32.const 14))))))
    (i32.store (local.get $out) (local.get $h))
    (i32.const 0))

  (func (export "TVMModImport") (param $mod i32) (param $dep i32) (result i32)
    (i32.const 0))

  (func (export "TVMModFree") (param $mod i32) (result i32)
    (i32.const 0))

  (func (export "TVMArrayAlloc")
    (param $shape i32) (param $ndim i32) (param $code i32) (param $bits i32) (param $lanes i32)
    (param $dev_type i32) (param $dev_id i32) (param $out i32) (result i32)
    (local $h i32) (local $s i32)
    (local.set $h (call $alloc (i32.const 40)))
    (local.set $s (call $alloc (i32.shl (local.get $ndim) (i32.const 3))))
    (memory.copy (local.get $s) (local.get $shape) (i32.shl (local.get $ndim) (i32.const 3)))
    (i32.store offset=4 (local.get $h) (local.get $dev_type))
    (i32.store offset=8 (local.get $h) (local.get $dev_id))
    (i32.store offset=12 (local.get $h) (local.get $ndim))
    (i32.store8 offset=16 (local.get $h) (local.get $code))
    (i32.store8 offset=17 (local.get $h) (local.get $bits))
    (i32.store16 offset=18 (local.get $h) (local.get $lanes))
    (i32.store offset=20 (local.get $h) (local.get $s))
    (i32.store offset=24 (local.get $h) (i32.const 0))
    (i64.store offset=32 (local.get $h) (i64.const 0))
    (i32.store (local.get $h)
      (call $alloc (i32.add (call $nbytes (local.get $h)) (i32.const 8))))
    (i32.store (local.get $out) (local.get $h))
    (i32.const 0))

  ;; freed headers point at address 0 so later reads see zeros
  (func (export "TVMArrayFree") (param $h i32) (result i32)
    (i32.store (local.get $h) (i32.const 0))
    (i64.store offset=32 (local.get $h) (i64.const 0))
    (i32.const 0))

  (func (export "TVMArrayCopyFromBytes") (param $h i32) (param $src i32) (param $n i32) (result i32)
    (if (i32.ne (local.get $n) (call $nbytes (local.get $h)))
      (then (return (call $fail (i32.const 2368)))))
    (memory.copy (call $data (local.get $h)) (local.get $src) (local.get $n))
    (i32.const 0))

  (func (export "TVMArrayCopyToBytes") (param $h i32) (param $dst i32) (param $n i32) (result i32)
    (if (i32.ne (local.get $n) (call $nbytes (local.get $h)))
      (then (return (call $fail (i32.const 2368)))))
    (memory.copy (local.get $dst) (call $data (local.get $h)) (local.get $n))
    (i32.const 0))

  (func (export "TVMArrayCopyFromTo") (param $from i32) (param $to i32) (param $stream i32) (result i32)
    (if (i32.ne (call $nbytes (local.get $from)) (call $nbytes (local.get $to)))
      (then (return (call $fail (i32.const 2368)))))
    (memory.copy
      (call $data (local.get $to))
      (call $data (local.get $from))
      (call $nbytes (local.get $from)))
    (i32.const 0))

  ;; ---------------------------------------------------------- dispatch

  (func $call (export "TVMFuncCall")
    (param $h i32) (param $values i32) (param $codes i32) (param $nargs i32)
    (param $ret_val i32) (param $ret_code i32) (result i32)
    (local $slot i32) (local $status i32)
    (i64.store (local.get $ret_val) (i64.const 0))
    (i32.store (local.get $ret_code) (i32.const 4))
    (if (i32.ge_u (local.get $h) (i32.const 1000))
      (then
        (local.set $slot (global.get $ret_sp))
        (global.set $ret_sp (i32.add (local.get $slot) (i32.const 16)))
        (i64.store (local.get $slot) (i64.const 0))
        (i32.store offset=8 (local.get $slot) (i32.const 4))
        (local.set $status
          (call $packed_cfunc
            (local.get $values) (local.get $codes) (local.get $nargs)
            (local.get $slot) (i32.sub (local.get $h) (i32.const 1000))))
        (global.set $ret_sp (local.get $slot))
        (i64.store (local.get $ret_val) (i64.load (local.get $slot)))
        (i32.store (local.get $ret_code) (i32.load offset=8 (local.get $slot)))
        (return (local.get $status))))
    (if (i32.eq (local.get $h) (i32.const 1))
      (then
        (i64.store (local.get $ret_val) (i64.const 100))
        (i32.store (local.get $ret_code) (i32.const 9))
        (return (i32.const 0))))
    (if (i32.eq (local.get $h) (i32.const 2))
      (then
        (return (call $graph_create
          (local.get $values) (local.get $codes) (local.get $nargs)
          (local.get $ret_val) (local.get $ret_code)))))
    (if (i32.eq (local.get $h) (i32.const 3))
      (then
        (return (call $echo
          (local.get $values) (local.get $codes) (local.get $nargs)
          (local.get $ret_val) (local.get $ret_code)))))
    (if (i32.eq (local.get $h) (i32.const 4))
      (then
        (if (i32.lt_s (local.get $nargs) (i32.const 1))
          (then (return (call $fail (i32.const 2496)))))
        (return (call $call
          (i32.load (local.get $values))
          (i32.add (local.get $values) (i32.const 8))
          (i32.add (local.get $codes) (i32.const 4))
          (i32.sub (local.get $nargs) (i32.const 1))
          (local.get $ret_val) (local.get $ret_code)))))
    (if (i32.eq (local.get $h) (i32.const 5))
      (then
        (return (call $call_async
          (local.get $values) (local.get $codes) (local.get $nargs)
          (local.get $ret_val) (local.get $ret_code)))))
    (if (i32.eq (local.get $h) (i32.const 6))
      (then
        (i64.store (local.get $ret_val) (global.get $reply_status))
        (i32.store (local.get $ret_code) (i32.const 0))
        (return (i32.const 0))))
    (if (i32.eq (local.get $h) (i32.const 7))
      (then
        (return (call $reply (local.get $values) (local.get $codes) (local.get $nargs)))))
    (if (i32.eq (local.get $h) (i32.const 8))
      (then
        (i64.store (local.get $ret_val) (global.get $reply_value))
        (i32.store (local.get $ret_code) (global.get $reply_code))
        (return (i32.const 0))))
    (if (i32.eq (local.get $h) (i32.const 9))
      (then
        (i64.store (local.get $ret_val) (i64.extend_i32_u (global.get $reply_count)))
        (i32.store (local.get $ret_code) (i32.const 0))
        (return (i32.const 0))))
    (if (i32.eq (local.get $h) (i32.const 10))
      (then (return (call $fail (i32.const 1984)))))
    (if (i32.eq (local.get $h) (i32.const 11))
      (then
        (return (call $set_input (local.get $values) (local.get $codes) (local.get $nargs)))))
    (if (i32.eq (local.get $h) (i32.const 12))
      (then (return (call $run))))
    (if (i32.eq (local.get $h) (i32.const 13))
      (then
        (return (call $get_output
          (local.get $values) (local.get $codes) (local.get $nargs)
          (local.get $ret_val) (local.get $ret_code)))))
    (if (i32.eq (local.get $h) (i32.const 14))
      (then
        (return (call $load_params (local.get $values) (local.get $codes) (local.get $nargs)))))
    (if (i32.eq (local.get $h) (i32.const 15))
      (then
        (return (call $call_bad
          (local.get $values) (local.get $codes) (local.get $nargs)
          (local.get $ret_val) (local.get $ret_code)))))
    (call $fail (i32.const 2496)))

  (func $echo
    (param $values i32) (param $codes i32) (param $nargs i32)
    (param $ret_val i32) (param $ret_code i32) (result i32)
    (local $v i64) (local $c i32)
    (if (i32.eqz (local.get $nargs)) (then (return (i32.const 0))))
    (local.set $v (i64.load (local.get $values)))
    (local.set $c (i32.load (local.get $codes)))
    (if (i32.eq (local.get $c) (i32.const 10))
      (then (call $rc_inc (i32.wrap_i64 (local.get $v)))))
    (i64.store (local.get $ret_val) (local.get $v))
    (i32.store (local.get $ret_code) (local.get $c))
    (i32.const 0))

  ;; testing.call_async(name, x): calls __async.<name>(x, reply)
  (func $call_async
    (param $values i32) (param $codes i32) (param $nargs i32)
    (param $ret_val i32) (param $ret_code i32) (result i32)
    (local $name i32) (local $entry i32)
    (if (i32.lt_s (local.get $nargs) (i32.const 2))
      (then (return (call $fail (i32.const 2176)))))
    (local.set $name (i32.load (local.get $values)))
    (memory.copy (i32.const 9792) (i32.const 1920) (i32.const 8))
    (memory.copy
      (i32.const 9800)
      (local.get $name)
      (i32.add (call $strlen (local.get $name)) (i32.const 1)))
    (local.set $entry (call $lookup (i32.const 9792)))
    (if (i32.eqz (local.get $entry))
      (then (return (call $fail (i32.const 2176)))))
    (i64.store (i32.const 9728) (i64.load offset=8 (local.get $values)))
    (i64.store (i32.const 9736) (i64.const 7))
    (i32.store (i32.const 9744) (i32.load offset=4 (local.get $codes)))
    (i32.store (i32.const 9748) (i32.const 10))
    (call $call
      (i32.load offset=4 (local.get $entry))
      (i32.const 9728) (i32.const 9744) (i32.const 2)
      (local.get $ret_val) (local.get $ret_code)))

  ;; testing.call_bad(f, x): calls f(x, y) with y tagged by an unknown type code
  (func $call_bad
    (param $values i32) (param $codes i32) (param $nargs i32)
    (param $ret_val i32) (param $ret_code i32) (result i32)
    (if (i32.lt_s (local.get $nargs) (i32.const 2))
      (then (return (call $fail (i32.const 2496)))))
    (i64.store (i32.const 9728) (i64.load offset=8 (local.get $values)))
    (i64.store (i32.const 9736) (i64.const 0))
    (i32.store (i32.const 9744) (i32.load offset=4 (local.get $codes)))
    (i32.store (i32.const 9748) (i32.const 99))
    (call $call
      (i32.load (local.get $values))
      (i32.const 9728) (i32.const 9744) (i32.const 2)
      (local.get $ret_val) (local.get $ret_code)))

  ;; reply callback: (status, value)
  (func $reply (param $values i32) (param $codes i32) (param $nargs i32) (result i32)
    (if (i32.lt_s (local.get $nargs) (i32.const 2))
      (then (return (call $fail (i32.const 2496)))))
    (global.set $reply_status (i64.load (local.get $values)))
    (global.set $reply_code (i32.load offset=4 (local.get $codes)))
    (global.set $reply_value (i64.load offset=8 (local.get $values)))
    (if (i32.eq (global.get $reply_code) (i32.const 11))
      (then
        (global.set $reply_value
          (i64.extend_i32_u (call $strdup (i32.wrap_i64 (global.get $reply_value)))))))
    (global.set $reply_count (i32.add (global.get $reply_count) (i32.const 1)))
    (i32.const 0))

  ;; ------------------------------------------------------ graph runtime

  (func $graph_create
    (param $values i32) (param $codes i32) (param $nargs i32)
    (param $ret_val i32) (param $ret_code i32) (result i32)
    (if (i32.lt_s (local.get $nargs) (i32.const 4))
      (then (return (call $fail (i32.const 2432)))))
    (if (i32.ne (i32.load (local.get $codes)) (i32.const 11))
      (then (return (call $fail (i32.const 2432)))))
    (if (i32.ne (i32.load offset=4 (local.get $codes)) (i32.const 9))
      (then (return (call $fail (i32.const 2432)))))
    (if (i64.ne (i64.load offset=8 (local.get $values)) (i64.const 100))
      (then (return (call $fail (i32.const 2432)))))
    (global.set $g_input (i32.const 0))
    (global.set $g_output (i32.const 0))
    (global.set $g_loaded (i32.const 0))
    (i64.store (local.get $ret_val) (i64.const 200))
    (i32.store (local.get $ret_code) (i32.const 9))
    (i32.const 0))

  (func $set_input (param $values i32) (param $codes i32) (param $nargs i32) (result i32)
    (local $key_code i32) (local $t i32) (local $out i32) (local $s i32) (local $ndim i32)
    (if (i32.lt_s (local.get $nargs) (i32.const 2))
      (then (return (call $fail (i32.const 2240)))))
    (local.set $key_code (i32.load (local.get $codes)))
    (if (i32.eqz (local.get $key_code))
      (then
        (if (i64.ne (i64.load (local.get $values)) (i64.const 0))
          (then (return (call $fail (i32.const 2240)))))))
    (if (i32.eq (local.get $key_code) (i32.const 11))
      (then
        (if (i32.eqz (call $streq (i32.load (local.get $values)) (i32.const 1856)))
          (then (return (call $fail (i32.const 2240)))))))
    (if (i32.and
          (i32.ne (local.get $key_code) (i32.const 0))
          (i32.ne (local.get $key_code) (i32.const 11)))
      (then (return (call $fail (i32.const 2240)))))
    (local.set $t (i32.load offset=8 (local.get $values)))
    (global.set $g_input (local.get $t))
    (if (i32.eqz (global.get $g_output))
      (then
        (local.set $out (call $alloc (i32.const 40)))
        (memory.copy (local.get $out) (local.get $t) (i32.const 40))
        (local.set $ndim (i32.load offset=12 (local.get $t)))
        (local.set $s (call $alloc (i32.shl (local.get $ndim) (i32.const 3))))
        (memory.copy
          (local.get $s)
          (i32.load offset=20 (local.get $t))
          (i32.shl (local.get $ndim) (i32.const 3)))
        (i32.store offset=20 (local.get $out) (local.get $s))
        (i64.store offset=32 (local.get $out) (i64.const 0))
        (i32.store (local.get $out)
          (call $alloc (i32.add (call $nbytes (local.get $t)) (i32.const 8))))
        (global.set $g_output (local.get $out))))
    (i32.const 0))

  (func $run (result i32)
    (if (i32.eqz (global.get $g_input))
      (then (return (call $fail (i32.const 2304)))))
    (memory.copy
      (call $data (global.get $g_output))
      (call $data (global.get $g_input))
      (call $nbytes (global.get $g_input)))
    (i32.const 0))

  (func $get_output
    (param $values i32) (param $codes i32) (param $nargs i32)
    (param $ret_val i32) (param $ret_code i32) (result i32)
    (local $dst i32) (local $n i32) (local $copy i32)
    (if (i32.lt_s (local.get $nargs) (i32.const 1))
      (then (return (call $fail (i32.const 2560)))))
    (if (i64.ne (i64.load (local.get $values)) (i64.const 0))
      (then (return (call $fail (i32.const 2560)))))
    (if (i32.eqz (global.get $g_output))
      (then (return (call $fail (i32.const 2304)))))
    (if (i32.ge_s (local.get $nargs) (i32.const 2))
      (then
        (local.set $dst (i32.load offset=8 (local.get $values)))
        (local.set $n (call $nbytes (global.get $g_output)))
        (if (i32.lt_u (call $nbytes (local.get $dst)) (local.get $n))
          (then (local.set $n (call $nbytes (local.get $dst)))))
        (memory.copy (call $data (local.get $dst)) (call $data (global.get $g_output)) (local.get $n))
        (return (i32.const 0))))
    (local.set $copy (call $alloc (i32.const 40)))
    (memory.copy (local.get $copy) (global.get $g_output) (i32.const 40))
    (i64.store (local.get $ret_val) (i64.extend_i32_u (local.get $copy)))
    (i32.store (local.get $ret_code) (i32.const 13))
    (i32.const 0))

  (func $load_params (param $values i32) (param $codes i32) (param $nargs i32) (result i32)
    (local $hdr i32)
    (if (i32.lt_s (local.get $nargs) (i32.const 1))
      (then (return (call $fail (i32.const 2048)))))
    (if (i32.ne (i32.load (local.get $codes)) (i32.const 12))
      (then (return (call $fail (i32.const 2048)))))
    (local.set $hdr (i32.load (local.get $values)))
    (if (i32.lt_u (i32.load offset=4 (local.get $hdr)) (i32.const 8))
      (then (return (call $fail (i32.const 2048)))))
    (if (i64.ne (i64.load (i32.load (local.get $hdr))) (i64.const 0xF7E58D4F05049CB7))
      (then (return (call $fail (i32.const 2048)))))
    (global.set $g_loaded (i32.const 1))
    (i32.const 0))
)
"#;
