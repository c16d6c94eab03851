//! Async host functions and device synchronization.
//!
//! The module calls `__async.<name>` synchronously, passing a reply
//! callback as the last argument. The adapter starts the host future,
//! queues it with a one-shot [`ReplyHandle`] and returns immediately.
//! `Instance::poll_async` later drives the queue and replies through
//! each handle exactly once.

use crate::codec::{Arg, Scalar, Value};
use crate::func_table::{HostFn, host_fn};
use crate::module::PackedFunc;
use crate::state::BridgeState;
use crate::timer::TimerJob;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::DeviceContext;
use wasmtime::AsContextMut;

/// Reply code for a successful async call.
pub const ASYNC_RETURN: i32 = 4;

/// Reply code for a failed async call, followed by the error message.
pub const ASYNC_EXCEPTION: i32 = 5;

/// A host function that completes later.
pub type AsyncHostFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Box an async closure as an [`AsyncHostFn`].
pub fn async_host_fn<F, Fut>(f: F) -> AsyncHostFn
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Waits for work queued on an asynchronous device.
pub trait DeviceSync: Send + Sync {
    /// Complete once everything submitted to `device` has finished.
    fn sync(&self, device: DeviceContext) -> BoxFuture<'static, Result<()>>;
}

/// One-shot continuation handed over by the module.
///
/// [`send`](Self::send) consumes the handle, so a reply can be delivered at
/// most once. Dropping it unsent logs a warning.
#[derive(Debug)]
pub struct ReplyHandle {
    function: String,
    callback: Option<PackedFunc>,
}

impl ReplyHandle {
    pub(crate) fn new(function: String, callback: PackedFunc) -> Self {
        Self {
            function,
            callback: Some(callback),
        }
    }

    /// Name of the async function this reply belongs to.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Deliver `result` to the module and release the callback.
    pub fn send<C>(mut self, ctx: &mut C, result: Result<Value>) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let Some(mut callback) = self.callback.take() else {
            return Ok(());
        };
        let delivered = match &result {
            Ok(value) => callback.call(ctx, &[Scalar::int32(ASYNC_RETURN).into(), value.into()]),
            Err(e) => {
                tracing::debug!(function = %self.function, error = %e, "Async host function failed");
                let message = e.to_string();
                callback.call(
                    ctx,
                    &[Scalar::int32(ASYNC_EXCEPTION).into(), message.as_str().into()],
                )
            }
        };
        let disposed = callback.dispose(&mut *ctx);
        if let Ok(value) = result {
            value.release(&mut *ctx)?;
        }
        delivered?.release(&mut *ctx)?;
        disposed
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        if self.callback.is_some() {
            tracing::warn!(function = %self.function, "Async reply handle dropped without a reply");
        }
    }
}

/// Work behind a queued async call.
pub(crate) enum AsyncWork {
    /// A host future that never touches the store.
    Detached(BoxFuture<'static, Result<Value>>),
    /// A timing run that re-enters the module between device syncs.
    Timer(TimerJob),
}

/// An async host call waiting to be driven.
pub(crate) struct PendingCall {
    pub(crate) work: AsyncWork,
    pub(crate) reply: ReplyHandle,
}

/// Global name the module looks up for async function `name`.
pub(crate) fn async_global_name(name: &str) -> String {
    format!("__async.{name}")
}

/// Pop the reply callback the module passes as the last argument.
pub(crate) fn take_reply(function: &str, args: &mut Vec<Value>) -> Result<ReplyHandle> {
    match args.pop() {
        Some(Value::Func(callback)) => Ok(ReplyHandle::new(function.to_string(), callback)),
        other => Err(BridgeError::AsyncContract {
            function: function.to_string(),
            cause: format!(
                "expected a reply callback as the last argument, got {}",
                other.map_or("nothing".to_string(), |v| v.type_code().to_string())
            ),
        }),
    }
}

/// Adapt `f` to the synchronous callback convention of `__async.<name>`.
pub(crate) fn wrap_async(name: String, f: AsyncHostFn) -> HostFn {
    host_fn(move |ctx, mut args| {
        let reply = take_reply(&name, &mut args)?;
        let future = f(args);
        tracing::debug!(function = %name, "Queued async host call");
        ctx.data_mut().pending.push(PendingCall {
            work: AsyncWork::Detached(future),
            reply,
        });
        Ok(Value::Null)
    })
}

/// `testing.asyncAddOne`: resolves to `x + 1` after a short delay.
pub(crate) fn add_one() -> AsyncHostFn {
    async_host_fn(|args: Vec<Value>| async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        match args.first() {
            Some(Value::Int(v)) => Ok(Value::Int(v + 1)),
            Some(Value::UInt(v)) => Ok(Value::UInt(v + 1)),
            Some(Value::Float(v)) => Ok(Value::Float(v + 1.0)),
            other => Err(BridgeError::unsupported_argument(
                other.map_or("nothing".to_string(), |v| v.type_code().to_string()),
            )),
        }
    })
}
