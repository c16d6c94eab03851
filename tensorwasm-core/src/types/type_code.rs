//! Type codes of the packed calling convention.

use std::fmt;

/// Tag stored next to every value slot.
///
/// The numeric values are part of the module ABI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TypeCode {
    /// Signed 64-bit integer.
    Int = 0,
    /// Unsigned 64-bit integer.
    UInt = 1,
    /// 64-bit float.
    Float = 2,
    /// Raw pointer into linear memory.
    OpaqueHandle = 3,
    /// No value.
    Null = 4,
    /// Device type and id packed as two int32.
    Context = 6,
    /// Borrowed tensor header, only valid for the duration of a callback.
    DLTensorHandle = 7,
    /// Generic object reference.
    ObjectHandle = 8,
    /// Runtime module reference.
    ModuleHandle = 9,
    /// Packed function reference.
    PackedFuncHandle = 10,
    /// Pointer to a NUL-terminated string.
    Str = 11,
    /// Pointer to a `{data, size}` byte array header.
    Bytes = 12,
    /// Owned tensor reference.
    NDArrayHandle = 13,
    /// Object reference passed as an rvalue.
    ObjectRValueRefArg = 14,
}

impl TypeCode {
    /// Size of one value slot in bytes.
    pub const VALUE_SIZE: u64 = 8;
    /// Size of one type-code slot in bytes.
    pub const CODE_SIZE: u64 = 4;

    /// Decode a raw code.
    pub fn from_raw(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Int,
            1 => Self::UInt,
            2 => Self::Float,
            3 => Self::OpaqueHandle,
            4 => Self::Null,
            6 => Self::Context,
            7 => Self::DLTensorHandle,
            8 => Self::ObjectHandle,
            9 => Self::ModuleHandle,
            10 => Self::PackedFuncHandle,
            11 => Self::Str,
            12 => Self::Bytes,
            13 => Self::NDArrayHandle,
            14 => Self::ObjectRValueRefArg,
            _ => return None,
        })
    }

    /// The raw wire value.
    pub const fn raw(self) -> i32 {
        self as i32
    }

    /// Whether a callback argument with this code must be converted into
    /// a return-owned reference before the host may keep it.
    pub const fn needs_callback_ownership(self) -> bool {
        matches!(
            self,
            Self::ObjectHandle
                | Self::ObjectRValueRefArg
                | Self::PackedFuncHandle
                | Self::ModuleHandle
        )
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.raw())
    }
}
