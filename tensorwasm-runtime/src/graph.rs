//! Graph executor facade.
//!
//! Wraps the four entry points of a graph runtime module. The executor
//! starts [`ExecutorState::Unloaded`]; `load_params` moves it to
//! [`ExecutorState::Ready`], after which inputs, runs and outputs may be
//! repeated freely.

use crate::codec::{Arg, Scalar};
use crate::module::{PackedFunc, RuntimeModule};
use crate::state::BridgeState;
use crate::tensor::Tensor;
use std::collections::HashMap;
use std::time::Instant;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::DeviceContext;
use wasmtime::{AsContext, AsContextMut};

/// Lifecycle of a [`GraphExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Functions resolved, parameters not loaded.
    Unloaded,
    /// Parameters loaded.
    Ready,
}

/// Input selector for [`GraphExecutor::set_input`].
#[derive(Debug, Clone, Copy)]
pub enum InputKey<'a> {
    /// Input position.
    Index(usize),
    /// Input name from the graph description.
    Name(&'a str),
}

impl From<usize> for InputKey<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl<'a> From<&'a str> for InputKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for InputKey<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

/// Runs one compiled graph.
#[derive(Debug)]
pub struct GraphExecutor {
    module: RuntimeModule,
    set_input: PackedFunc,
    run: PackedFunc,
    get_output: PackedFunc,
    load_params: PackedFunc,
    device: DeviceContext,
    state: ExecutorState,
    outputs: HashMap<usize, Tensor>,
}

impl GraphExecutor {
    /// Create the executor through a `tvm.graph_runtime.create` function.
    pub fn new<C>(
        ctx: &mut C,
        create: &PackedFunc,
        graph_json: &str,
        lib: &RuntimeModule,
        device: DeviceContext,
    ) -> Result<Self>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let module = create
            .call(
                ctx,
                &[
                    graph_json.into(),
                    lib.into(),
                    Scalar::int32(device.device_type.raw()).into(),
                    Scalar::int32(device.device_id).into(),
                ],
            )?
            .into_module()?;

        Ok(Self {
            set_input: module.get_function(ctx, "set_input")?,
            run: module.get_function(ctx, "run")?,
            get_output: module.get_function(ctx, "get_output")?,
            load_params: module.get_function(ctx, "load_params")?,
            module,
            device,
            state: ExecutorState::Unloaded,
            outputs: HashMap::new(),
        })
    }

    /// Current state.
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Device the graph runs on.
    pub fn device(&self) -> DeviceContext {
        self.device
    }

    /// The backing runtime module.
    pub fn module(&self) -> &RuntimeModule {
        &self.module
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ExecutorState::Ready => Ok(()),
            ExecutorState::Unloaded => Err(BridgeError::NotReady { operation }),
        }
    }

    /// Load a serialized parameter blob. Validation happens in the module.
    pub fn load_params<C>(&mut self, ctx: &mut C, params: &[u8]) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.load_params.call(ctx, &[Arg::Bytes(params)])?;
        self.state = ExecutorState::Ready;
        tracing::info!(bytes = params.len(), "Loaded graph parameters");
        Ok(())
    }

    /// Bind an input by index or name.
    pub fn set_input<'k, C>(
        &mut self,
        ctx: &mut C,
        key: impl Into<InputKey<'k>>,
        tensor: &Tensor,
    ) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.ensure_ready("set_input")?;
        let key = match key.into() {
            InputKey::Index(i) => Arg::Scalar(index_arg(i)?),
            InputKey::Name(name) => Arg::Str(name),
        };
        self.set_input.call(ctx, &[key, tensor.into()])?;
        Ok(())
    }

    /// Execute the whole graph once.
    pub fn run<C>(&mut self, ctx: &mut C) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.ensure_ready("run")?;
        self.run.call(ctx, &[])?;
        Ok(())
    }

    /// A view onto output `index`.
    ///
    /// The executor keeps the owning reference and frees it when the same
    /// output is fetched again or the executor is disposed.
    pub fn get_output<C>(&mut self, ctx: &mut C, index: usize) -> Result<Tensor>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.ensure_ready("get_output")?;
        let output = self
            .get_output
            .call(ctx, &[index_arg(index)?.into()])?
            .into_tensor()?;
        let view = output.as_view();
        if let Some(mut previous) = self.outputs.insert(index, output) {
            previous.dispose(&mut *ctx)?;
        }
        Ok(view)
    }

    /// Copy output `index` into `out`.
    pub fn get_output_into<C>(&mut self, ctx: &mut C, index: usize, out: &Tensor) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.ensure_ready("get_output")?;
        self.get_output
            .call(ctx, &[index_arg(index)?.into(), out.into()])?;
        Ok(())
    }

    /// Time `run`, returning milliseconds per run for each of `repeat` batches.
    ///
    /// One untimed warm-up run comes first. Each batch runs `number` times
    /// and syncs the device once at the end.
    pub async fn benchmark<C>(&mut self, ctx: &mut C, number: usize, repeat: usize) -> Result<Vec<f64>>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.ensure_ready("benchmark")?;
        let number = number.max(1);
        self.run(ctx)?;

        let mut results = Vec::with_capacity(repeat);
        for _ in 0..repeat {
            let start = Instant::now();
            for _ in 0..number {
                self.run(ctx)?;
            }
            let sync = ctx.as_context().data().sync_future(self.device);
            sync.await?;
            results.push(start.elapsed().as_secs_f64() * 1000.0 / number as f64);
        }
        tracing::debug!(number, repeat, ?results, "Benchmark finished");
        Ok(results)
    }

    /// Free every function, cached output and the module.
    pub fn dispose<C>(&mut self, ctx: &mut C) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        for (_, mut output) in self.outputs.drain() {
            output.dispose(&mut *ctx)?;
        }
        self.set_input.dispose(&mut *ctx)?;
        self.run.dispose(&mut *ctx)?;
        self.get_output.dispose(&mut *ctx)?;
        self.load_params.dispose(&mut *ctx)?;
        self.module.dispose(&mut *ctx)
    }
}

/// Graph positions travel as int32.
fn index_arg(index: usize) -> Result<Scalar> {
    i32::try_from(index)
        .map(Scalar::int32)
        .map_err(|_| BridgeError::module(format!("graph index {index} is out of int32 range")))
}
