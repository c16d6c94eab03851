//! Host functions callable from the module.
//!
//! The table owns the closures; the module only ever holds their integer
//! index (the `resource` handle passed to `TVMWasmFuncCreateFromCFunc`).
//! Every re-entry goes through [`invoke_host_func`], called by the
//! `env.TVMWasmPackedCFunc` import.

use crate::codec::{Arg, Value, decode_value, encode_arguments};
use crate::ffi::with_call_stack;
use crate::state::{BridgeState, library};
use std::sync::Arc;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::TypeCode;
use wasmtime::Caller;

/// Store context seen by host functions while the module is calling them.
pub type CallContext<'a> = Caller<'a, BridgeState>;

/// A host closure exposed to the module as a packed function.
///
/// Callables and modules received as arguments are owned by the closure
/// and should be disposed once it is done with them.
pub type HostFn = Arc<dyn Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value> + Send + Sync>;

/// Box a closure as a [`HostFn`].
pub fn host_fn<F>(f: F) -> HostFn
where
    F: Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Indexed table of host functions with free-slot recycling.
#[derive(Default)]
pub struct HostFuncTable {
    slots: Vec<Option<HostFn>>,
    free_ids: Vec<usize>,
}

impl HostFuncTable {
    /// Store `f` and return its index. Index 0 is never handed out.
    pub fn insert(&mut self, f: HostFn) -> usize {
        if self.slots.is_empty() {
            self.slots.push(None);
        }
        match self.free_ids.pop() {
            Some(id) => {
                self.slots[id] = Some(f);
                id
            }
            None => {
                self.slots.push(Some(f));
                self.slots.len() - 1
            }
        }
    }

    /// Look up a live function.
    pub fn get(&self, id: usize) -> Option<HostFn> {
        self.slots.get(id).and_then(Clone::clone)
    }

    /// Drop the function at `id`, recycling its slot.
    pub fn remove(&mut self, id: usize) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free_ids.push(id);
                true
            }
            _ => false,
        }
    }

    /// Number of live functions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether no functions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body of `env.TVMWasmPackedCFunc(args, codes, nargs, ret, resource)`.
///
/// Decodes the arguments, runs the host closure and, if it produced a
/// value, writes exactly one return slot through `TVMCFuncSetReturn`.
pub(crate) fn invoke_host_func(
    caller: &mut CallContext<'_>,
    args: u64,
    codes: u64,
    nargs: usize,
    ret: u64,
    resource: u64,
) -> Result<i32> {
    let func = usize::try_from(resource)
        .ok()
        .and_then(|id| caller.data().host_funcs.get(id))
        .ok_or_else(|| BridgeError::FunctionNotFound {
            name: format!("host function #{resource}"),
        })?;
    let lib = library(&*caller)?;
    let memory = *lib.memory();

    let mut values = Vec::with_capacity(nargs);
    for i in 0..nargs as u64 {
        let value_ptr = args + i * TypeCode::VALUE_SIZE;
        let code_ptr = codes + i * TypeCode::CODE_SIZE;
        let code = memory.load_i32(&*caller, code_ptr)?;
        let code = if TypeCode::from_raw(code).is_some_and(TypeCode::needs_callback_ownership) {
            lib.cb_arg_to_return(&mut *caller, value_ptr, code_ptr)?;
            memory.load_i32(&*caller, code_ptr)?
        } else {
            code
        };
        match decode_value(&*caller, &lib, value_ptr, code, true) {
            Ok(value) => values.push(value),
            Err(e) => {
                release_values(caller, values);
                return Err(e);
            }
        }
    }

    let rv = func(&mut *caller, values)?;
    if !rv.is_null() {
        set_return(caller, ret, &rv)?;
        rv.release(caller)?;
    }
    Ok(0)
}

/// Drop handles retained for arguments decoded before a failure.
fn release_values(caller: &mut CallContext<'_>, values: Vec<Value>) {
    for value in values {
        if let Err(e) = value.release(&mut *caller) {
            tracing::warn!(error = %e, "Failed to release callback argument");
        }
    }
}

fn set_return(caller: &mut CallContext<'_>, ret: u64, rv: &Value) -> Result<()> {
    with_call_stack(caller, |ctx, lib, stack| {
        let value = stack.alloc_raw_bytes(TypeCode::VALUE_SIZE as usize);
        let code = stack.alloc_raw_bytes(TypeCode::CODE_SIZE as usize);
        encode_arguments(ctx, stack, &[Arg::from(rv)], value, code)?;
        let top = stack.top();
        stack.commit(&mut *ctx, lib, top)?;
        lib.cfunc_set_return(&mut *ctx, ret, stack.ptr(value), stack.ptr(code))
    })
}

/// Body of `env.TVMWasmPackedCFuncFinalizer(resource)`.
pub(crate) fn release_host_func(caller: &mut CallContext<'_>, resource: u64) {
    let removed = usize::try_from(resource)
        .map(|id| caller.data_mut().host_funcs.remove(id))
        .unwrap_or(false);
    tracing::trace!(resource, removed, "Finalized host function");
}
