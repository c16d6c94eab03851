//! Tensors backed by a header in linear memory.
//!
//! A [`Tensor`] caches the header fields when it is created and never
//! re-reads them. Data moves in and out through the module's copy
//! primitives, staged on a scratch call stack.

use crate::ffi::{FfiLibrary, with_call_stack};
use crate::state::{BridgeState, library};
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::{DataType, DeviceContext, HostArray, TensorLayout};
use wasmtime::{AsContext, AsContextMut};

/// A tensor owned by the module, or a view borrowing another tensor's header.
#[derive(Debug)]
pub struct Tensor {
    handle: u64,
    is_view: bool,
    data: u64,
    shape: Vec<i64>,
    dtype: DataType,
    device: DeviceContext,
    byte_offset: u64,
    num_elements: u64,
    nbytes: u64,
}

/// Element count and storage bytes for `shape` of `dtype`.
///
/// Fails on negative dimensions and on sizes that overflow `u64`.
pub(crate) fn checked_size(shape: &[i64], dtype: DataType) -> Result<(u64, u64)> {
    let invalid = |cause: String| BridgeError::InvalidShape {
        shape: shape.to_vec(),
        cause,
    };
    let mut count: u64 = 1;
    for &dim in shape {
        let dim =
            u64::try_from(dim).map_err(|_| invalid(format!("dimension {dim} is negative")))?;
        count = count
            .checked_mul(dim)
            .ok_or_else(|| invalid("element count overflows".into()))?;
    }
    let nbytes = count
        .checked_mul(dtype.storage_bytes())
        .ok_or_else(|| invalid(format!("{count} elements of {dtype} overflow the byte size")))?;
    Ok((count, nbytes))
}

/// Source accepted by [`Tensor::copy_from`].
#[derive(Debug, Clone, Copy)]
pub enum CopySource<'a> {
    /// Another tensor, copied by the module (works across devices).
    Tensor(&'a Tensor),
    /// A typed host array whose length must equal the element count.
    Host(&'a HostArray),
    /// Raw bytes whose length must equal the storage size.
    Bytes(&'a [u8]),
}

impl<'a> From<&'a Tensor> for CopySource<'a> {
    fn from(t: &'a Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl<'a> From<&'a HostArray> for CopySource<'a> {
    fn from(a: &'a HostArray) -> Self {
        Self::Host(a)
    }
}

impl<'a> From<&'a [u8]> for CopySource<'a> {
    fn from(b: &'a [u8]) -> Self {
        Self::Bytes(b)
    }
}

impl Tensor {
    /// Parse the header at `handle`. Reads only; never allocates.
    pub fn from_handle(
        store: impl AsContext,
        lib: &FfiLibrary,
        handle: u64,
        is_view: bool,
    ) -> Result<Self> {
        let memory = lib.memory();
        let layout = TensorLayout::new(lib.width());

        let data = memory.load_ptr(&store, handle + layout.data)?;
        let device = DeviceContext::from_raw(
            memory.load_i32(&store, handle + layout.device_type)?,
            memory.load_i32(&store, handle + layout.device_id)?,
        )?;
        let ndim = memory.load_i32(&store, handle + layout.ndim)?;
        let dtype = DataType::from_raw(
            memory.load_u8(&store, handle + layout.dtype_code)?,
            memory.load_u8(&store, handle + layout.dtype_bits)?,
            memory.load_u16(&store, handle + layout.dtype_lanes)?,
        )?;
        let shape_ptr = memory.load_ptr(&store, handle + layout.shape)?;
        let shape = (0..ndim.max(0) as u64)
            .map(|i| memory.load_i64(&store, shape_ptr + i * 8))
            .collect::<Result<Vec<_>>>()?;
        let byte_offset = memory.load_i64(&store, handle + layout.byte_offset)? as u64;
        let (num_elements, nbytes) = checked_size(&shape, dtype)?;

        Ok(Self {
            handle,
            is_view,
            data,
            shape,
            dtype,
            device,
            byte_offset,
            num_elements,
            nbytes,
        })
    }

    /// Header address, 0 once disposed.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Whether this tensor borrows its header.
    pub fn is_view(&self) -> bool {
        self.is_view
    }

    /// Data pointer from the header.
    pub fn data_ptr(&self) -> u64 {
        self.data
    }

    /// Shape.
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Device holding the storage.
    pub fn device(&self) -> DeviceContext {
        self.device
    }

    /// Byte offset of the first element from the data pointer.
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// Product of the shape; 1 for a scalar.
    pub fn num_elements(&self) -> u64 {
        self.num_elements
    }

    /// Storage size in bytes.
    pub fn nbytes(&self) -> u64 {
        self.nbytes
    }

    /// A view over the same header. Disposing it does nothing.
    pub fn as_view(&self) -> Tensor {
        Tensor {
            handle: self.handle,
            is_view: true,
            data: self.data,
            shape: self.shape.clone(),
            dtype: self.dtype,
            device: self.device,
            byte_offset: self.byte_offset,
            num_elements: self.num_elements,
            nbytes: self.nbytes,
        }
    }

    pub(crate) fn live_handle(&self) -> Result<u64> {
        if self.handle == 0 {
            Err(BridgeError::UseAfterDispose { what: "tensor" })
        } else {
            Ok(self.handle)
        }
    }

    /// Copy from another tensor, a host array or raw bytes.
    pub fn copy_from<'a, C>(&self, ctx: &mut C, source: impl Into<CopySource<'a>>) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        match source.into() {
            CopySource::Tensor(t) => self.copy_from_tensor(ctx, t),
            CopySource::Host(a) => self.copy_from_host(ctx, a),
            CopySource::Bytes(b) => self.copy_from_raw_bytes(ctx, b),
        }
    }

    /// Device-aware copy from another tensor.
    pub fn copy_from_tensor(
        &self,
        mut ctx: impl AsContextMut<Data = BridgeState>,
        source: &Tensor,
    ) -> Result<()> {
        let to = self.live_handle()?;
        let from = source.live_handle()?;
        library(&ctx)?.array_copy_from_to(&mut ctx, from, to)
    }

    /// Copy a host array, converting to this tensor's element type.
    ///
    /// The array length must equal [`num_elements`](Self::num_elements).
    pub fn copy_from_host<C>(&self, ctx: &mut C, array: &HostArray) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.live_handle()?;
        if array.len() as u64 != self.num_elements() {
            return Err(BridgeError::ShapeMismatch {
                expected: self.num_elements(),
                actual: array.len() as u64,
            });
        }
        let element_type = self.dtype.element_type()?;
        self.copy_from_raw_bytes(ctx, &array.encode_as(element_type))
    }

    /// Copy raw little-endian bytes. The length must equal [`nbytes`](Self::nbytes).
    pub fn copy_from_raw_bytes<C>(&self, ctx: &mut C, bytes: &[u8]) -> Result<()>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let handle = self.live_handle()?;
        if bytes.len() as u64 != self.nbytes() {
            return Err(BridgeError::ByteLengthMismatch {
                expected: self.nbytes(),
                actual: bytes.len() as u64,
            });
        }
        with_call_stack(ctx, |ctx, lib, stack| {
            let offset = stack.alloc_raw_bytes(bytes.len());
            stack.store_raw(offset, bytes);
            let top = stack.top();
            stack.commit(&mut *ctx, lib, top)?;
            lib.array_copy_from_bytes(&mut *ctx, handle, stack.ptr(offset), bytes.len() as u64)
        })
    }

    /// Read the storage as raw bytes. CPU tensors only.
    pub fn to_raw_bytes<C>(&self, ctx: &mut C) -> Result<Vec<u8>>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let handle = self.live_handle()?;
        self.ensure_cpu()?;
        let nbytes = self.nbytes();
        with_call_stack(ctx, |ctx, lib, stack| {
            let offset = stack.alloc_raw_bytes(nbytes as usize);
            stack.commit(&mut *ctx, lib, offset)?;
            let ptr = stack.ptr(offset);
            lib.array_copy_to_bytes(&mut *ctx, handle, ptr, nbytes)?;
            lib.memory().load_raw(&*ctx, ptr, nbytes)
        })
    }

    /// Read the storage as a typed host array. CPU tensors only.
    pub fn to_host_array<C>(&self, ctx: &mut C) -> Result<HostArray>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        self.ensure_cpu()?;
        let element_type = self.dtype.element_type()?;
        let bytes = self.to_raw_bytes(ctx)?;
        HostArray::from_le_bytes(element_type, &bytes)
    }

    fn ensure_cpu(&self) -> Result<()> {
        if self.device.is_cpu() {
            Ok(())
        } else {
            Err(BridgeError::UnsupportedDeviceCopy {
                device: self.device.to_string(),
            })
        }
    }

    /// Free an owning tensor. No-op for views and for repeated calls.
    pub fn dispose(&mut self, mut ctx: impl AsContextMut<Data = BridgeState>) -> Result<()> {
        if self.is_view || self.handle == 0 {
            return Ok(());
        }
        let lib = library(&ctx)?;
        let handle = std::mem::take(&mut self.handle);
        lib.array_free(&mut ctx, handle)
    }
}
