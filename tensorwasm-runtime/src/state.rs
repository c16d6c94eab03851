//! Per-instance host state stored inside the Wasmtime store.

use crate::async_task::{DeviceSync, PendingCall};
use crate::ffi::{CallStack, CallStackPool, FfiLibrary};
use crate::func_table::HostFuncTable;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::{DeviceContext, DeviceType, PointerWidth};
use wasmtime::{AsContext, StoreLimits};
use wasmtime_wasi::preview1::WasiP1Ctx;

/// Host state of one bridge instance.
///
/// Owns everything the module can reach back into: the host function
/// table, the scratch stack pool, queued async calls and device hooks.
pub struct BridgeState {
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) limits: StoreLimits,
    pub(crate) lib: Option<FfiLibrary>,
    pub(crate) host_funcs: HostFuncTable,
    pub(crate) pending: Vec<PendingCall>,
    call_stacks: CallStackPool,
    call_stack_size: usize,
    device_syncs: HashMap<DeviceType, Arc<dyn DeviceSync>>,
}

impl BridgeState {
    pub(crate) fn new(wasi: WasiP1Ctx, limits: StoreLimits, call_stack_size: usize) -> Self {
        Self {
            wasi,
            limits,
            lib: None,
            host_funcs: HostFuncTable::default(),
            pending: Vec::new(),
            call_stacks: CallStackPool::default(),
            call_stack_size,
            device_syncs: HashMap::new(),
        }
    }

    pub(crate) fn acquire_call_stack(&mut self, width: PointerWidth) -> CallStack {
        self.call_stacks.acquire(width, self.call_stack_size)
    }

    pub(crate) fn release_call_stack(&mut self, stack: CallStack) {
        self.call_stacks.release(stack);
    }

    pub(crate) fn drain_call_stacks(&mut self) -> Vec<CallStack> {
        self.call_stacks.drain()
    }

    /// Number of idle scratch stacks.
    pub fn scratch_pool_size(&self) -> usize {
        self.call_stacks.len()
    }

    /// Number of live host functions.
    pub fn host_func_count(&self) -> usize {
        self.host_funcs.len()
    }

    /// Number of async host calls waiting for delivery.
    pub fn pending_async(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn set_device_sync(&mut self, device: DeviceType, hook: Arc<dyn DeviceSync>) {
        self.device_syncs.insert(device, hook);
    }

    /// Future that completes once work queued on `device` has finished.
    pub(crate) fn sync_future(&self, device: DeviceContext) -> BoxFuture<'static, Result<()>> {
        match self.device_syncs.get(&device.device_type) {
            Some(hook) => hook.sync(device),
            None if device.device_type.is_async() => future::ready(Err(
                BridgeError::DeviceUnavailable {
                    device: device.to_string(),
                },
            ))
            .boxed(),
            None => future::ready(Ok(())).boxed(),
        }
    }
}

/// The bound library, or an error once the instance is disposed.
pub(crate) fn library(ctx: impl AsContext<Data = BridgeState>) -> Result<FfiLibrary> {
    ctx.as_context()
        .data()
        .lib
        .ok_or(BridgeError::UseAfterDispose {
            what: "bridge instance",
        })
}
