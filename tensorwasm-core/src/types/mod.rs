//! Core types shared by the bridge and its callers.
//!
//! - `TypeCode`: tags of the packed calling convention
//! - `DataType` / `ElementType`: tensor element descriptors
//! - `DeviceType` / `DeviceContext`: where tensor storage lives
//! - `PointerWidth` / `TensorLayout`: tensor header ABI
//! - `HostArray`: typed host buffers

mod device;
mod dtype;
mod host_array;
mod layout;
mod type_code;

pub use device::{DeviceContext, DeviceType};
pub use dtype::{DataType, DataTypeCode, ElementType};
pub use host_array::HostArray;
pub use layout::{PointerWidth, TensorLayout};
pub use type_code::TypeCode;
