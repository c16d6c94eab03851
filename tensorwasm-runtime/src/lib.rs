//! TensorWasm Runtime - host bridge for WebAssembly tensor-graph modules.
//!
//! This crate drives compiled model modules through their packed-function
//! C API:
//! - Engine configuration and a compiled module cache
//! - Scratch call stacks that marshal arguments into linear memory
//! - The packed value codec and a re-entrant host function table
//! - Tensors over the module's tensor header ABI
//! - Module and global function registries
//! - A graph executor with parameter loading and benchmarking
//! - Async host functions and device synchronization hooks
//! - Artifact bundles and a classifier built on top of them
//!
//! Module code runs synchronously on the calling thread. The only
//! suspension points are compilation ([`Instance::instantiate`]) and
//! device synchronization ([`Instance::sync`], [`GraphExecutor::benchmark`]).

#![warn(missing_docs)]

pub mod async_task;
pub mod bundle;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod engine;
pub mod env;
pub mod ffi;
pub mod func_table;
pub mod graph;
pub mod instance;
pub mod module;
pub mod observability;
pub mod state;
pub mod tensor;
pub mod timer;

pub use async_task::{AsyncHostFn, DeviceSync, ReplyHandle, async_host_fn};
pub use bundle::{ArtifactBundle, ModelManifest};
pub use classifier::{Classification, Classifier, LoadTimings};
pub use codec::{Arg, Scalar, Value};
pub use config::RuntimeConfig;
pub use engine::{BinaryKey, CompiledModule, WasmRuntime};
pub use env::Imports;
pub use func_table::{CallContext, HostFn, host_fn};
pub use graph::{ExecutorState, GraphExecutor, InputKey};
pub use instance::Instance;
pub use module::{PackedFunc, RuntimeModule};
pub use state::BridgeState;
pub use tensor::{CopySource, Tensor};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::async_task::{AsyncHostFn, DeviceSync, async_host_fn};
    pub use crate::bundle::{ArtifactBundle, ModelManifest};
    pub use crate::classifier::{Classification, Classifier};
    pub use crate::codec::{Arg, Scalar, Value};
    pub use crate::config::RuntimeConfig;
    pub use crate::engine::WasmRuntime;
    pub use crate::env::Imports;
    pub use crate::func_table::{HostFn, host_fn};
    pub use crate::graph::GraphExecutor;
    pub use crate::instance::Instance;
    pub use crate::module::{PackedFunc, RuntimeModule};
    pub use crate::tensor::Tensor;
    pub use tensorwasm_core::{BridgeError, DataType, DeviceContext, DeviceType, HostArray, Result};
}
