//! `__async.wasm.TimeExecution`, the timer behind the module's time evaluator.
//!
//! The module calls the timer synchronously with a reply callback. The run
//! itself is queued and driven by `Instance::poll_async`, which awaits the
//! device after every timed invocation and replies with the per-step
//! seconds as little-endian float64 bytes.

use crate::async_task::{AsyncWork, PendingCall, take_reply};
use crate::codec::{Scalar, Value};
use crate::func_table::{HostFn, host_fn};
use crate::module::PackedFunc;
use crate::state::BridgeState;
use futures::future::BoxFuture;
use std::time::Instant;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::DeviceContext;
use wasmtime::{AsContext, AsContextMut};

/// Name of the timer, without the `__async.` prefix.
pub const TIME_EXECUTION: &str = "wasm.TimeExecution";

/// Something that can be invoked a given number of times and then synced.
pub trait TimedTarget {
    /// Run the measured work `steps` times.
    fn invoke(&mut self, steps: i32) -> Result<()>;
    /// Future that completes once the device has finished.
    fn sync(&mut self) -> BoxFuture<'static, Result<()>>;
}

/// Measure seconds per step for `repeat` rounds.
///
/// Each round grows the step count until one timed invocation takes at
/// least `min_repeat_ms`.
pub async fn time_execution(
    target: &mut impl TimedTarget,
    nstep: i32,
    repeat: usize,
    min_repeat_ms: f64,
) -> Result<Vec<f64>> {
    let nstep = nstep.max(1);
    target.invoke(1)?;
    target.sync().await?;

    let mut results = Vec::with_capacity(repeat);
    let mut setup = nstep;
    for _ in 0..repeat {
        let mut duration_ms = 0.0;
        let mut attempts = 0;
        loop {
            if duration_ms > 0.0 {
                let per_step = duration_ms / setup as f64;
                let grown = (min_repeat_ms / per_step + 1.0).max(setup as f64 * 1.618);
                setup = grown.floor().min(i32::MAX as f64) as i32;
            } else if attempts > 0 {
                setup = setup.saturating_mul(2);
            }
            let start = Instant::now();
            target.invoke(setup)?;
            target.sync().await?;
            duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            attempts += 1;
            if duration_ms >= min_repeat_ms {
                break;
            }
        }
        results.push(duration_ms / setup as f64 / 1000.0);
    }
    Ok(results)
}

/// A queued timing run.
pub(crate) struct TimerJob {
    func: PackedFunc,
    device: DeviceContext,
    nstep: i32,
    repeat: usize,
    min_repeat_ms: f64,
}

impl TimerJob {
    /// Time the job's function, then release it.
    pub(crate) async fn run<C>(mut self, ctx: &mut C) -> Result<Value>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let timed = {
            let mut target = PackedTarget {
                ctx: &mut *ctx,
                func: &self.func,
                device: self.device,
            };
            time_execution(&mut target, self.nstep, self.repeat, self.min_repeat_ms).await
        };
        self.func.dispose(&mut *ctx)?;

        let bytes = timed?.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(Value::Bytes(bytes))
    }
}

struct PackedTarget<'c, C> {
    ctx: &'c mut C,
    func: &'c PackedFunc,
    device: DeviceContext,
}

impl<C: AsContextMut<Data = BridgeState>> TimedTarget for PackedTarget<'_, C> {
    fn invoke(&mut self, steps: i32) -> Result<()> {
        self.func
            .call(&mut *self.ctx, &[Scalar::int32(steps).into()])?
            .release(&mut *self.ctx)
    }

    fn sync(&mut self) -> BoxFuture<'static, Result<()>> {
        self.ctx.as_context().data().sync_future(self.device)
    }
}

/// Host function `(finvoke, ctx, nstep, repeat, min_repeat_ms, reply)`.
///
/// Queues the run; bad arguments are reported through `reply`.
pub(crate) fn time_execution_fn() -> HostFn {
    host_fn(|ctx, mut args| {
        let reply = take_reply(TIME_EXECUTION, &mut args)?;
        let mut args = args.into_iter();
        let (func, device) = match (args.next(), args.next()) {
            (Some(Value::Func(func)), Some(Value::Context(device))) => (func, device),
            (first, second) => {
                for value in first.into_iter().chain(second).chain(args) {
                    value.release(&mut *ctx)?;
                }
                let err = BridgeError::unsupported_argument(
                    "wasm.TimeExecution expects (func, context, nstep, repeat, min_repeat_ms)",
                );
                reply.send(&mut *ctx, Err(err))?;
                return Ok(Value::Null);
            }
        };
        let mut number = || args.next().and_then(|v| v.as_f64()).unwrap_or(0.0);
        let job = TimerJob {
            func,
            device,
            nstep: number() as i32,
            repeat: number().max(0.0) as usize,
            min_repeat_ms: number(),
        };

        tracing::debug!(device = %device, "Queued time evaluation");
        ctx.data_mut().pending.push(PendingCall {
            work: AsyncWork::Timer(job),
            reply,
        });
        Ok(Value::Null)
    })
}
