//! Module and packed function handles.
//!
//! Both wrap an opaque integer handle owned by the module. Disposal is
//! explicit because freeing needs the store. A [`RuntimeModule`] hands a
//! shared liveness flag to every function looked up through it, so
//! disposing the module turns later calls into
//! [`BridgeError::UseAfterDispose`] instead of a call through a stale handle.

use crate::codec::{Arg, Value, decode_value, encode_arguments};
use crate::ffi::with_call_stack;
use crate::func_table::HostFn;
use crate::state::{BridgeState, library};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::TypeCode;
use wasmtime::AsContextMut;

#[derive(Debug, Clone)]
pub(crate) struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A callable exported by the module or wrapping a host closure.
#[derive(Debug)]
pub struct PackedFunc {
    handle: u64,
    owner: Option<Liveness>,
}

impl PackedFunc {
    pub(crate) fn new(handle: u64, owner: Option<Liveness>) -> Self {
        Self { handle, owner }
    }

    /// Raw handle, 0 once disposed.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Whether the function and the module it came from are both alive.
    pub fn is_alive(&self) -> bool {
        self.handle != 0 && self.owner.as_ref().is_none_or(Liveness::is_alive)
    }

    pub(crate) fn live_handle(&self) -> Result<u64> {
        if self.is_alive() {
            Ok(self.handle)
        } else {
            Err(BridgeError::UseAfterDispose {
                what: "packed function",
            })
        }
    }

    /// Call the function and wait for its result.
    pub fn call<C>(&self, ctx: &mut C, args: &[Arg<'_>]) -> Result<Value>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let handle = self.live_handle()?;
        tracing::trace!(handle, nargs = args.len(), "Calling packed function");
        with_call_stack(ctx, |ctx, lib, stack| {
            let nargs = args.len();
            let values = stack.alloc_raw_bytes(TypeCode::VALUE_SIZE as usize * nargs);
            let codes = stack.alloc_raw_bytes(TypeCode::CODE_SIZE as usize * nargs);
            encode_arguments(ctx, stack, args, values, codes)?;
            let ret_value = stack.alloc_raw_bytes(TypeCode::VALUE_SIZE as usize);
            let ret_code = stack.alloc_raw_bytes(TypeCode::CODE_SIZE as usize);
            // the module writes the return slots itself
            stack.commit(&mut *ctx, lib, ret_value)?;

            lib.func_call(
                &mut *ctx,
                handle,
                stack.ptr(values),
                stack.ptr(codes),
                nargs,
                stack.ptr(ret_value),
                stack.ptr(ret_code),
            )?;
            let code = lib.memory().load_i32(&*ctx, stack.ptr(ret_code))?;
            decode_value(&*ctx, lib, stack.ptr(ret_value), code, false)
        })
    }

    /// Release the handle. Calling this twice is a no-op.
    pub fn dispose(&mut self, mut ctx: impl AsContextMut<Data = BridgeState>) -> Result<()> {
        if self.handle == 0 {
            return Ok(());
        }
        let lib = library(&ctx)?;
        let handle = std::mem::take(&mut self.handle);
        lib.func_free(&mut ctx, handle)
    }
}

/// A loaded runtime module, such as the system library or a graph executor.
#[derive(Debug)]
pub struct RuntimeModule {
    handle: u64,
    alive: Liveness,
}

impl RuntimeModule {
    pub(crate) fn new(handle: u64) -> Self {
        Self {
            handle,
            alive: Liveness::new(),
        }
    }

    /// Raw handle, 0 once disposed.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Whether the module has not been disposed.
    pub fn is_alive(&self) -> bool {
        self.handle != 0
    }

    pub(crate) fn live_handle(&self) -> Result<u64> {
        if self.is_alive() {
            Ok(self.handle)
        } else {
            Err(BridgeError::UseAfterDispose { what: "module" })
        }
    }

    /// Look up a function, searching imported modules too.
    pub fn get_function<C>(&self, ctx: &mut C, name: &str) -> Result<PackedFunc>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let module = self.live_handle()?;
        let handle = with_call_stack(ctx, |ctx, lib, stack| {
            let name_offset = stack.alloc_cstring(name);
            let out = stack.alloc_ptr_array(1);
            stack.commit(&mut *ctx, lib, out)?;
            lib.mod_get_function(&mut *ctx, module, stack.ptr(name_offset), stack.ptr(out))?;
            lib.memory().load_ptr(&*ctx, stack.ptr(out))
        })?;
        if handle == 0 {
            return Err(BridgeError::FunctionNotFound {
                name: name.to_string(),
            });
        }
        Ok(PackedFunc::new(handle, Some(self.alive.clone())))
    }

    /// Make `dep`'s functions resolvable through this module.
    pub fn import_module(
        &self,
        mut ctx: impl AsContextMut<Data = BridgeState>,
        dep: &RuntimeModule,
    ) -> Result<()> {
        let module = self.live_handle()?;
        let dep = dep.live_handle()?;
        library(&ctx)?.mod_import(&mut ctx, module, dep)
    }

    /// Free the module and invalidate every function obtained from it.
    pub fn dispose(&mut self, mut ctx: impl AsContextMut<Data = BridgeState>) -> Result<()> {
        if self.handle == 0 {
            return Ok(());
        }
        self.alive.kill();
        let lib = library(&ctx)?;
        let handle = std::mem::take(&mut self.handle);
        lib.mod_free(&mut ctx, handle)
    }
}

/// Expose a host closure to the module as a packed function.
pub(crate) fn create_packed_func<C>(ctx: &mut C, f: HostFn) -> Result<PackedFunc>
where
    C: AsContextMut<Data = BridgeState>,
{
    let id = ctx.as_context_mut().data_mut().host_funcs.insert(f);
    let created = with_call_stack(ctx, |ctx, lib, stack| {
        let out = stack.alloc_ptr_array(1);
        stack.commit(&mut *ctx, lib, out)?;
        lib.func_create_from_cfunc(&mut *ctx, id as u64, stack.ptr(out))?;
        lib.memory().load_ptr(&*ctx, stack.ptr(out))
    });
    match created {
        Ok(handle) => Ok(PackedFunc::new(handle, None)),
        Err(e) => {
            ctx.as_context_mut().data_mut().host_funcs.remove(id);
            Err(e)
        }
    }
}
