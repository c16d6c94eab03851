//! The packed calling convention.
//!
//! Every argument or return value crosses the boundary as an 8-byte value
//! slot plus a 4-byte [`TypeCode`]. [`encode_arguments`] is the single place
//! where a host value picks its wire variant; [`decode_value`] is the
//! inverse and always dispatches on the code it is given.

use crate::ffi::{CallStack, FfiLibrary};
use crate::func_table::HostFn;
use crate::module::{PackedFunc, RuntimeModule, create_packed_func};
use crate::state::BridgeState;
use crate::tensor::Tensor;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::{DataType, DataTypeCode, DeviceContext, TypeCode};
use wasmtime::{AsContext, AsContextMut};

/// A number tagged with the dtype it should be passed as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scalar {
    dtype: DataType,
    value: ScalarBits,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScalarBits {
    Int(i64),
    Float(f64),
}

impl Scalar {
    /// Tag `value` with a dtype string such as `"int32"` or `"float64"`.
    pub fn new(value: f64, dtype: &str) -> Result<Self> {
        let dtype: DataType = dtype.parse()?;
        let value = match dtype.code {
            DataTypeCode::Float => ScalarBits::Float(value),
            _ => ScalarBits::Int(value as i64),
        };
        Ok(Self { dtype, value })
    }

    /// An `int32` scalar.
    pub fn int32(value: i32) -> Self {
        Self {
            dtype: DataType::INT32,
            value: ScalarBits::Int(value as i64),
        }
    }

    /// An `int64` scalar.
    pub fn int64(value: i64) -> Self {
        Self {
            dtype: DataType::INT64,
            value: ScalarBits::Int(value),
        }
    }

    /// A `uint64` scalar.
    pub fn uint64(value: u64) -> Self {
        Self {
            dtype: DataType::new(DataTypeCode::UInt, 64, 1),
            value: ScalarBits::Int(value as i64),
        }
    }

    /// A `float32` scalar.
    pub fn float32(value: f32) -> Self {
        Self {
            dtype: DataType::FLOAT32,
            value: ScalarBits::Float(value as f64),
        }
    }

    /// A `float64` scalar.
    pub fn float64(value: f64) -> Self {
        Self {
            dtype: DataType::FLOAT64,
            value: ScalarBits::Float(value),
        }
    }

    /// An opaque pointer.
    pub fn handle(ptr: u64) -> Self {
        Self {
            dtype: DataType::new(DataTypeCode::Handle, 64, 1),
            value: ScalarBits::Int(ptr as i64),
        }
    }

    /// The tagged dtype.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// The value as a float.
    pub fn as_f64(&self) -> f64 {
        match self.value {
            ScalarBits::Int(v) => v as f64,
            ScalarBits::Float(v) => v,
        }
    }

    fn encode(&self, stack: &mut CallStack, value_offset: usize) -> TypeCode {
        match (self.dtype.code, self.value) {
            (DataTypeCode::Float, ScalarBits::Float(v)) => {
                stack.store_f64(value_offset, v);
                TypeCode::Float
            }
            (DataTypeCode::Float, ScalarBits::Int(v)) => {
                stack.store_f64(value_offset, v as f64);
                TypeCode::Float
            }
            (DataTypeCode::Handle, ScalarBits::Int(v)) => {
                stack.store_i64(value_offset, v);
                TypeCode::OpaqueHandle
            }
            (_, ScalarBits::Int(v)) => {
                stack.store_i64(value_offset, v);
                TypeCode::Int
            }
            (_, ScalarBits::Float(v)) => {
                stack.store_i64(value_offset, v as i64);
                TypeCode::Int
            }
        }
    }
}

/// An argument to a packed function call.
#[derive(Clone)]
pub enum Arg<'a> {
    /// Passed as `NDArrayHandle`, or `DLTensorHandle` for views.
    Tensor(&'a Tensor),
    /// Passed as `Context`.
    Context(DeviceContext),
    /// Passed with the code implied by its dtype.
    Scalar(Scalar),
    /// A bare number, always passed as `Float`.
    Number(f64),
    /// Passed as `PackedFuncHandle`.
    Func(&'a PackedFunc),
    /// Passed as `Null`.
    Null,
    /// Copied onto the call stack and passed as `Str`.
    Str(&'a str),
    /// Copied onto the call stack and passed as `Bytes`.
    Bytes(&'a [u8]),
    /// Wrapped into a temporary packed function for the duration of the call.
    HostFunc(HostFn),
    /// Passed as `ModuleHandle`.
    Module(&'a RuntimeModule),
}

impl std::fmt::Debug for Arg<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tensor(t) => f.debug_tuple("Tensor").field(t).finish(),
            Self::Context(c) => f.debug_tuple("Context").field(c).finish(),
            Self::Scalar(s) => f.debug_tuple("Scalar").field(s).finish(),
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::Func(func) => f.debug_tuple("Func").field(func).finish(),
            Self::Null => f.write_str("Null"),
            Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::HostFunc(_) => f.write_str("HostFunc"),
            Self::Module(m) => f.debug_tuple("Module").field(m).finish(),
        }
    }
}

impl<'a> From<&'a Tensor> for Arg<'a> {
    fn from(t: &'a Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<DeviceContext> for Arg<'_> {
    fn from(c: DeviceContext) -> Self {
        Self::Context(c)
    }
}

impl From<Scalar> for Arg<'_> {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

impl From<f64> for Arg<'_> {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Arg<'_> {
    fn from(v: i32) -> Self {
        Self::Scalar(Scalar::int32(v))
    }
}

impl From<i64> for Arg<'_> {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::int64(v))
    }
}

impl<'a> From<&'a PackedFunc> for Arg<'a> {
    fn from(f: &'a PackedFunc) -> Self {
        Self::Func(f)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(s: &'a str) -> Self {
        Self::Str(s)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(s: &'a String) -> Self {
        Self::Str(s)
    }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(b: &'a [u8]) -> Self {
        Self::Bytes(b)
    }
}

impl<'a> From<&'a Vec<u8>> for Arg<'a> {
    fn from(b: &'a Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<HostFn> for Arg<'_> {
    fn from(f: HostFn) -> Self {
        Self::HostFunc(f)
    }
}

impl<'a> From<&'a RuntimeModule> for Arg<'a> {
    fn from(m: &'a RuntimeModule) -> Self {
        Self::Module(m)
    }
}

impl<'a> From<&'a Value> for Arg<'a> {
    fn from(v: &'a Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Int(i) => Self::Scalar(Scalar::int64(*i)),
            Value::UInt(u) => Self::Scalar(Scalar::uint64(*u)),
            Value::Float(f) => Self::Number(*f),
            Value::Handle(h) => Self::Scalar(Scalar::handle(*h)),
            Value::Context(c) => Self::Context(*c),
            Value::Tensor(t) => Self::Tensor(t),
            Value::Func(f) => Self::Func(f),
            Value::Module(m) => Self::Module(m),
            Value::Str(s) => Self::Str(s),
            Value::Bytes(b) => Self::Bytes(b),
        }
    }
}

/// A value received from the module.
#[derive(Debug)]
pub enum Value {
    /// `Null`
    Null,
    /// `Int`
    Int(i64),
    /// `UInt`
    UInt(u64),
    /// `Float`
    Float(f64),
    /// `OpaqueHandle`
    Handle(u64),
    /// `Context`
    Context(DeviceContext),
    /// `NDArrayHandle` or `DLTensorHandle`
    Tensor(Tensor),
    /// `PackedFuncHandle`
    Func(PackedFunc),
    /// `ModuleHandle`
    Module(RuntimeModule),
    /// `Str`
    Str(String),
    /// `Bytes`
    Bytes(Vec<u8>),
}

impl Value {
    /// Wire code this value travels under.
    pub fn type_code(&self) -> TypeCode {
        match self {
            Self::Null => TypeCode::Null,
            Self::Int(_) => TypeCode::Int,
            Self::UInt(_) => TypeCode::UInt,
            Self::Float(_) => TypeCode::Float,
            Self::Handle(_) => TypeCode::OpaqueHandle,
            Self::Context(_) => TypeCode::Context,
            Self::Tensor(t) if t.is_view() => TypeCode::DLTensorHandle,
            Self::Tensor(_) => TypeCode::NDArrayHandle,
            Self::Func(_) => TypeCode::PackedFuncHandle,
            Self::Module(_) => TypeCode::ModuleHandle,
            Self::Str(_) => TypeCode::Str,
            Self::Bytes(_) => TypeCode::Bytes,
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload of `Int`, `UInt` or `Handle`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) | Self::Handle(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Numeric payload as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Take a module out, or fail with the code actually received.
    pub fn into_module(self) -> Result<RuntimeModule> {
        match self {
            Self::Module(m) => Ok(m),
            other => Err(other.unexpected()),
        }
    }

    /// Take a packed function out, or fail with the code actually received.
    pub fn into_func(self) -> Result<PackedFunc> {
        match self {
            Self::Func(f) => Ok(f),
            other => Err(other.unexpected()),
        }
    }

    /// Take a tensor out, or fail with the code actually received.
    pub fn into_tensor(self) -> Result<Tensor> {
        match self {
            Self::Tensor(t) => Ok(t),
            other => Err(other.unexpected()),
        }
    }

    /// Take a byte array out, or fail with the code actually received.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(b) => Ok(b),
            other => Err(other.unexpected()),
        }
    }

    fn unexpected(&self) -> BridgeError {
        BridgeError::UnsupportedReturnType {
            code: self.type_code().raw(),
        }
    }

    /// Free any module-side handle owned by this value.
    pub fn release(self, ctx: impl AsContextMut<Data = BridgeState>) -> Result<()> {
        match self {
            Self::Tensor(mut t) => t.dispose(ctx),
            Self::Func(mut f) => f.dispose(ctx),
            Self::Module(mut m) => m.dispose(ctx),
            _ => Ok(()),
        }
    }
}

/// Write `args` into value slots at `value_offset` and code slots at
/// `code_offset`, in call order.
///
/// Host closures are registered as packed functions and parked on the
/// stack's temporary list so they outlive the call.
pub fn encode_arguments<C>(
    ctx: &mut C,
    stack: &mut CallStack,
    args: &[Arg<'_>],
    value_offset: usize,
    code_offset: usize,
) -> Result<()>
where
    C: AsContextMut<Data = BridgeState>,
{
    for (i, arg) in args.iter().enumerate() {
        let value = value_offset + i * TypeCode::VALUE_SIZE as usize;
        let code = match arg {
            Arg::Tensor(t) => {
                stack.store_i64(value, t.live_handle()? as i64);
                if t.is_view() {
                    TypeCode::DLTensorHandle
                } else {
                    TypeCode::NDArrayHandle
                }
            }
            Arg::Context(c) => {
                stack.store_i32(value, c.device_type.raw());
                stack.store_i32(value + 4, c.device_id);
                TypeCode::Context
            }
            Arg::Scalar(s) => s.encode(stack, value),
            Arg::Number(n) => {
                stack.store_f64(value, *n);
                TypeCode::Float
            }
            Arg::Func(f) => {
                stack.store_i64(value, f.live_handle()? as i64);
                TypeCode::PackedFuncHandle
            }
            Arg::Null => {
                stack.store_i64(value, 0);
                TypeCode::Null
            }
            Arg::Str(s) => {
                if s.contains('\0') {
                    return Err(BridgeError::unsupported_argument(
                        "string with interior NUL",
                    ));
                }
                stack.alloc_then_set_arg_string(value, s);
                TypeCode::Str
            }
            Arg::Bytes(b) => {
                stack.alloc_then_set_arg_bytes(value, b);
                TypeCode::Bytes
            }
            Arg::HostFunc(f) => {
                let func = create_packed_func(ctx, f.clone())?;
                stack.store_i64(value, func.handle() as i64);
                stack.push_temp_arg(func);
                TypeCode::PackedFuncHandle
            }
            Arg::Module(m) => {
                stack.store_i64(value, m.live_handle()? as i64);
                TypeCode::ModuleHandle
            }
        };
        stack.store_i32(code_offset + i * TypeCode::CODE_SIZE as usize, code.raw());
    }
    Ok(())
}

/// Read the value slot at `value_ptr` as `code`.
///
/// `callback_arg` marks values handed to a host function by the module:
/// tensors among them borrow the caller's frame and decode as views.
pub fn decode_value(
    store: impl AsContext<Data = BridgeState>,
    lib: &FfiLibrary,
    value_ptr: u64,
    code: i32,
    callback_arg: bool,
) -> Result<Value> {
    let memory = lib.memory();
    let Some(type_code) = TypeCode::from_raw(code) else {
        return Err(BridgeError::UnsupportedReturnType { code });
    };
    Ok(match type_code {
        TypeCode::Int => Value::Int(memory.load_i64(&store, value_ptr)?),
        TypeCode::UInt => Value::UInt(memory.load_i64(&store, value_ptr)? as u64),
        TypeCode::Float => Value::Float(memory.load_f64(&store, value_ptr)?),
        TypeCode::OpaqueHandle => Value::Handle(memory.load_ptr(&store, value_ptr)?),
        TypeCode::Null => Value::Null,
        TypeCode::Context => Value::Context(DeviceContext::from_raw(
            memory.load_i32(&store, value_ptr)?,
            memory.load_i32(&store, value_ptr + 4)?,
        )?),
        TypeCode::NDArrayHandle => {
            let handle = memory.load_ptr(&store, value_ptr)?;
            Value::Tensor(Tensor::from_handle(&store, lib, handle, callback_arg)?)
        }
        TypeCode::DLTensorHandle if callback_arg => {
            let handle = memory.load_ptr(&store, value_ptr)?;
            Value::Tensor(Tensor::from_handle(&store, lib, handle, true)?)
        }
        TypeCode::PackedFuncHandle => {
            Value::Func(PackedFunc::new(memory.load_ptr(&store, value_ptr)?, None))
        }
        TypeCode::ModuleHandle => {
            Value::Module(RuntimeModule::new(memory.load_ptr(&store, value_ptr)?))
        }
        TypeCode::Str => {
            let ptr = memory.load_ptr(&store, value_ptr)?;
            Value::Str(memory.load_cstring(&store, ptr)?)
        }
        TypeCode::Bytes => {
            let ptr = memory.load_ptr(&store, value_ptr)?;
            Value::Bytes(memory.load_byte_array(&store, ptr)?)
        }
        _ => return Err(BridgeError::UnsupportedReturnType { code }),
    })
}
