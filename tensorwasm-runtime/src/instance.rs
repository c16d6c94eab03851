//! Bridge instance: one module instance with its own store and host state.

use crate::async_task::{
    AsyncHostFn, AsyncWork, DeviceSync, add_one, async_global_name, wrap_async,
};
use crate::engine::{CompiledModule, WasmRuntime};
use crate::env::Imports;
use crate::ffi::{FfiLibrary, map_call_error, with_call_stack};
use crate::func_table::HostFn;
use crate::graph::GraphExecutor;
use crate::module::{PackedFunc, RuntimeModule, create_packed_func};
use crate::state::BridgeState;
use crate::tensor::{Tensor, checked_size};
use crate::timer::{TIME_EXECUTION, time_execution_fn};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::sync::Arc;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::{DataType, DeviceContext, DeviceType};
use wasmtime::{
    AsContext, AsContextMut, Instance as WasmInstance, Linker, Store, StoreContext,
    StoreContextMut, StoreLimitsBuilder,
};

/// Global registered by the runtime for its system library.
const SYSTEM_LIB: &str = "runtime.SystemLib";

/// Global that creates graph executors.
const GRAPH_RUNTIME_CREATE: &str = "tvm.graph_runtime.create";

/// An instantiated runtime module.
///
/// Implements [`AsContextMut`], so it can be passed wherever a function,
/// tensor or executor needs the store.
pub struct Instance {
    store: Store<BridgeState>,
    name: String,
    registered: Vec<PackedFunc>,
}

impl Instance {
    /// Link and instantiate a compiled module.
    ///
    /// Runs `_initialize` when exported, binds the C API and registers the
    /// environment globals before returning.
    pub fn new(runtime: &WasmRuntime, compiled: &CompiledModule, imports: Imports) -> Result<Self> {
        let config = runtime.config();
        let name = compiled.name().to_string();
        let instantiate_error = |e: anyhow::Error| BridgeError::Instantiate {
            module: name.clone(),
            cause: format!("{e:#}"),
        };

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();
        let state = BridgeState::new(imports.build_wasi(), limits, config.call_stack_size);
        let mut store = Store::new(runtime.engine(), state);
        store.limiter(|s| &mut s.limits);
        if let Some(fuel) = runtime.initial_fuel() {
            store.set_fuel(fuel).map_err(instantiate_error)?;
        }
        if config.epoch_interruption {
            store.set_epoch_deadline(config.epoch_deadline);
        }

        let mut linker = Linker::new(runtime.engine());
        let imported_memory = imports.link(&mut linker, &mut store, compiled.module(), &name)?;
        let instance: WasmInstance = linker
            .instantiate(&mut store, compiled.module())
            .map_err(instantiate_error)?;

        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            init.call(&mut store, ())
                .map_err(|e| map_call_error("_initialize", e))?;
        }

        let lib = FfiLibrary::new(&mut store, &instance, imported_memory)?;
        store.data_mut().lib = Some(lib);

        let mut this = Self {
            store,
            name,
            registered: Vec::new(),
        };
        this.register_env_functions()?;
        tracing::info!(
            module = %this.name,
            width = ?lib.width(),
            memory_bytes = lib.memory().size(&this.store),
            "Instantiated module"
        );
        Ok(this)
    }

    /// Compile on the blocking pool, then instantiate.
    pub async fn instantiate(
        runtime: Arc<WasmRuntime>,
        name: &str,
        wasm_bytes: Vec<u8>,
        imports: Imports,
    ) -> Result<Self> {
        let task_runtime = Arc::clone(&runtime);
        let task_name = name.to_string();
        let compiled =
            tokio::task::spawn_blocking(move || task_runtime.compile(&task_name, &wasm_bytes))
                .await
                .map_err(|e| BridgeError::Compile {
                    module: name.to_string(),
                    cause: e.to_string(),
                })??;
        Self::new(&runtime, &compiled, imports)
    }

    /// Compile and instantiate synchronously.
    pub fn from_bytes(
        runtime: &WasmRuntime,
        name: &str,
        wasm_bytes: &[u8],
        imports: Imports,
    ) -> Result<Self> {
        let compiled = runtime.compile(name, wasm_bytes)?;
        Self::new(runtime, &compiled, imports)
    }

    /// Name the module was compiled under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying store.
    pub fn store(&self) -> &Store<BridgeState> {
        &self.store
    }

    /// Mutable access to the underlying store.
    pub fn store_mut(&mut self) -> &mut Store<BridgeState> {
        &mut self.store
    }

    fn register_env_functions(&mut self) -> Result<()> {
        self.register_func(&async_global_name(TIME_EXECUTION), time_execution_fn(), true)?;
        self.register_async_func("testing.asyncAddOne", add_one(), true)
    }

    /// Register a host function as global `name`.
    pub fn register_func(&mut self, name: &str, f: HostFn, override_existing: bool) -> Result<()> {
        let mut func = create_packed_func(&mut self.store, f)?;
        let handle = func.handle();
        let registered = with_call_stack(&mut self.store, |ctx, lib, stack| {
            let name_offset = stack.alloc_cstring(name);
            let top = stack.top();
            stack.commit(&mut *ctx, lib, top)?;
            lib.func_register_global(&mut *ctx, stack.ptr(name_offset), handle, override_existing)
        });
        match registered {
            Ok(()) => {
                tracing::debug!(name, handle, "Registered host function");
                self.registered.push(func);
                Ok(())
            }
            Err(e) => {
                func.dispose(&mut self.store)?;
                Err(e)
            }
        }
    }

    /// Register an async host function as global `__async.<name>`.
    pub fn register_async_func(
        &mut self,
        name: &str,
        f: AsyncHostFn,
        override_existing: bool,
    ) -> Result<()> {
        let wrapped = wrap_async(name.to_string(), f);
        self.register_func(&async_global_name(name), wrapped, override_existing)
    }

    /// Look up a global function.
    pub fn get_global_func(&mut self, name: &str) -> Result<PackedFunc> {
        let handle = with_call_stack(&mut self.store, |ctx, lib, stack| {
            let name_offset = stack.alloc_cstring(name);
            let out = stack.alloc_ptr_array(1);
            stack.commit(&mut *ctx, lib, out)?;
            lib.func_get_global(&mut *ctx, stack.ptr(name_offset), stack.ptr(out))?;
            lib.memory().load_ptr(&*ctx, stack.ptr(out))
        })?;
        if handle == 0 {
            return Err(BridgeError::SymbolNotFound {
                name: name.to_string(),
            });
        }
        Ok(PackedFunc::new(handle, None))
    }

    /// Names of every registered global function.
    pub fn list_global_func_names(&mut self) -> Result<Vec<String>> {
        with_call_stack(&mut self.store, |ctx, lib, stack| {
            let out_size = stack.alloc_raw_bytes(8);
            let out_array = stack.alloc_ptr_array(1);
            stack.commit(&mut *ctx, lib, out_size)?;
            lib.func_list_global_names(&mut *ctx, stack.ptr(out_size), stack.ptr(out_array))?;

            let memory = lib.memory();
            let count = memory.load_i32(&*ctx, stack.ptr(out_size))?.max(0) as u64;
            let array = memory.load_ptr(&*ctx, stack.ptr(out_array))?;
            (0..count)
                .map(|i| {
                    let ptr = memory.load_ptr(&*ctx, array + i * lib.sizeof_ptr())?;
                    memory.load_cstring(&*ctx, ptr)
                })
                .collect()
        })
    }

    /// Wrap a host function as a packed function without registering it.
    pub fn to_packed_func(&mut self, f: HostFn) -> Result<PackedFunc> {
        create_packed_func(&mut self.store, f)
    }

    /// The system library module.
    pub fn system_lib(&mut self) -> Result<RuntimeModule> {
        let mut get = self.get_global_func(SYSTEM_LIB)?;
        let module = get.call(self, &[]);
        get.dispose(&mut self.store)?;
        module?.into_module()
    }

    /// A device context by name, such as `"cpu"` or `"webgpu"`.
    pub fn context(&self, device: &str, device_id: i32) -> Result<DeviceContext> {
        Ok(DeviceContext::new(device.parse()?, device_id))
    }

    /// A CPU context.
    pub fn cpu(&self, device_id: i32) -> DeviceContext {
        DeviceContext::cpu(device_id)
    }

    /// A WebGPU context.
    pub fn webgpu(&self, device_id: i32) -> DeviceContext {
        DeviceContext::webgpu(device_id)
    }

    /// Allocate an empty tensor.
    ///
    /// Shape entries must be non-negative and `dtype` must parse; both are
    /// checked before anything is allocated.
    pub fn create_tensor(
        &mut self,
        shape: &[i64],
        dtype: &str,
        device: DeviceContext,
    ) -> Result<Tensor> {
        if let Some(bad) = shape.iter().find(|&&d| d < 0) {
            return Err(BridgeError::InvalidShape {
                shape: shape.to_vec(),
                cause: format!("dimension {bad} is negative"),
            });
        }
        let dtype: DataType = dtype.parse()?;
        self.create_tensor_typed(shape, dtype, device)
    }

    /// Allocate an empty tensor with an already parsed dtype.
    pub fn create_tensor_typed(
        &mut self,
        shape: &[i64],
        dtype: DataType,
        device: DeviceContext,
    ) -> Result<Tensor> {
        checked_size(shape, dtype)?;
        with_call_stack(&mut self.store, |ctx, lib, stack| {
            let shape_offset = stack.alloc_raw_bytes(8 * shape.len());
            for (i, dim) in shape.iter().enumerate() {
                stack.store_i64(shape_offset + i * 8, *dim);
            }
            let out = stack.alloc_ptr_array(1);
            stack.commit(&mut *ctx, lib, out)?;
            lib.array_alloc(
                &mut *ctx,
                stack.ptr(shape_offset),
                shape.len(),
                (dtype.code as u8, dtype.bits, dtype.lanes),
                (device.device_type.raw(), device.device_id),
                stack.ptr(out),
            )?;
            let handle = lib.memory().load_ptr(&*ctx, stack.ptr(out))?;
            Tensor::from_handle(&*ctx, lib, handle, false)
        })
    }

    /// Create a graph executor for `graph_json` over `lib`.
    pub fn create_graph_executor(
        &mut self,
        graph_json: &str,
        lib: &RuntimeModule,
        device: DeviceContext,
    ) -> Result<GraphExecutor> {
        let mut create = self.get_global_func(GRAPH_RUNTIME_CREATE)?;
        let executor = GraphExecutor::new(self, &create, graph_json, lib, device);
        create.dispose(&mut self.store)?;
        executor
    }

    /// Install the sync hook for a device type.
    pub fn register_device_sync(&mut self, device: DeviceType, hook: Arc<dyn DeviceSync>) {
        self.store.data_mut().set_device_sync(device, hook);
    }

    /// Wait for work queued on `device`.
    ///
    /// A no-op for synchronous devices without a hook; asynchronous devices
    /// without a hook fail with [`BridgeError::DeviceUnavailable`].
    pub fn sync(&self, device: DeviceContext) -> BoxFuture<'static, Result<()>> {
        self.store.data().sync_future(device)
    }

    /// Drive queued async host calls and deliver their replies.
    ///
    /// Timing runs re-enter the module and go one at a time; detached host
    /// futures are driven together. Replies are delivered in call order and
    /// may queue further calls, which are driven too. Returns the number of
    /// replies delivered, or the first delivery error.
    pub async fn poll_async(&mut self) -> Result<usize> {
        let mut delivered = 0;
        let mut first_error = None;
        loop {
            let pending = std::mem::take(&mut self.store.data_mut().pending);
            if pending.is_empty() {
                break;
            }
            let mut replies = Vec::with_capacity(pending.len());
            let mut settled = Vec::with_capacity(pending.len());
            let mut detached = Vec::new();
            for (index, call) in pending.into_iter().enumerate() {
                match call.work {
                    AsyncWork::Detached(future) => {
                        detached.push(future.map(move |result| (index, result)));
                    }
                    AsyncWork::Timer(job) => settled.push((index, job.run(&mut self.store).await)),
                }
                replies.push(call.reply);
            }
            settled.extend(join_all(detached).await);
            settled.sort_by_key(|(index, _)| *index);

            for (reply, (_, result)) in replies.into_iter().zip(settled) {
                if let Err(e) = reply.send(&mut self.store, result) {
                    tracing::warn!(error = %e, "Failed to deliver async reply");
                    first_error.get_or_insert(e);
                }
                delivered += 1;
            }
        }
        first_error.map_or(Ok(delivered), Err)
    }

    /// Number of async calls waiting for [`poll_async`](Self::poll_async).
    pub fn pending_async(&self) -> usize {
        self.store.data().pending_async()
    }

    /// Number of idle scratch stacks.
    pub fn scratch_pool_size(&self) -> usize {
        self.store.data().scratch_pool_size()
    }

    /// Number of live host functions.
    pub fn host_func_count(&self) -> usize {
        self.store.data().host_func_count()
    }

    /// Release registered functions and scratch memory.
    ///
    /// The instance is unusable afterwards; further calls fail with
    /// [`BridgeError::UseAfterDispose`].
    pub fn dispose(&mut self) -> Result<()> {
        let Some(lib) = self.store.data().lib else {
            return Ok(());
        };
        for mut func in std::mem::take(&mut self.registered) {
            func.dispose(&mut self.store)?;
        }
        for mut stack in self.store.data_mut().drain_call_stacks() {
            stack.dispose(&mut self.store, &lib)?;
        }
        self.store.data_mut().lib = None;
        tracing::debug!(module = %self.name, "Disposed instance");
        Ok(())
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("registered", &self.registered.len())
            .field("scratch_pool_size", &self.scratch_pool_size())
            .finish()
    }
}

impl AsContext for Instance {
    type Data = BridgeState;

    fn as_context(&self) -> StoreContext<'_, BridgeState> {
        self.store.as_context()
    }
}

impl AsContextMut for Instance {
    fn as_context_mut(&mut self) -> StoreContextMut<'_, BridgeState> {
        self.store.as_context_mut()
    }
}
