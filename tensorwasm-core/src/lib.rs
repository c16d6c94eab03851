//! TensorWasm Core Library
//!
//! Vocabulary shared by the module bridge and its callers: the error
//! taxonomy, calling-convention type codes, dtype and device descriptors,
//! the tensor header layout and typed host arrays.
//!
//! Nothing here touches a WebAssembly engine, so artifact tooling can
//! depend on it without pulling in the runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{BridgeError, Result};
pub use types::{
    DataType, DataTypeCode, DeviceContext, DeviceType, ElementType, HostArray, PointerWidth,
    TensorLayout, TypeCode,
};
