//! Typed loads and stores over a module's linear memory.
//!
//! All values are little-endian. Every access is bounds checked and fails
//! with [`BridgeError::MemoryAccess`] instead of panicking.

use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::PointerWidth;
use wasmtime::{AsContext, AsContextMut, Memory};

/// Accessor for one module's linear memory.
#[derive(Debug, Clone, Copy)]
pub struct LinearMemory {
    memory: Memory,
    width: PointerWidth,
}

impl LinearMemory {
    /// Wrap a memory, reading its addressing mode from the store.
    pub fn new(store: impl AsContext, memory: Memory) -> Self {
        let width = PointerWidth::from_is_64(memory.ty(&store).is_64());
        Self { memory, width }
    }

    /// The underlying Wasmtime memory.
    pub fn memory(&self) -> Memory {
        self.memory
    }

    /// Pointer width of the memory.
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    /// Size of a pointer in bytes.
    pub fn sizeof_ptr(&self) -> u64 {
        self.width.bytes()
    }

    /// Current size in bytes.
    pub fn size(&self, store: impl AsContext) -> u64 {
        self.memory.data_size(&store) as u64
    }

    fn read_array<const N: usize>(&self, store: impl AsContext, ptr: u64) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.memory
            .read(&store, to_offset(ptr, N)?, &mut buf)
            .map_err(|_| access_error(ptr, N))?;
        Ok(buf)
    }

    /// Load a `u8`.
    pub fn load_u8(&self, store: impl AsContext, ptr: u64) -> Result<u8> {
        Ok(self.read_array::<1>(store, ptr)?[0])
    }

    /// Load a `u16`.
    pub fn load_u16(&self, store: impl AsContext, ptr: u64) -> Result<u16> {
        self.read_array(store, ptr).map(u16::from_le_bytes)
    }

    /// Load an `i32`.
    pub fn load_i32(&self, store: impl AsContext, ptr: u64) -> Result<i32> {
        self.read_array(store, ptr).map(i32::from_le_bytes)
    }

    /// Load an `i64`.
    pub fn load_i64(&self, store: impl AsContext, ptr: u64) -> Result<i64> {
        self.read_array(store, ptr).map(i64::from_le_bytes)
    }

    /// Load an `f64`.
    pub fn load_f64(&self, store: impl AsContext, ptr: u64) -> Result<f64> {
        self.read_array(store, ptr).map(f64::from_le_bytes)
    }

    /// Load a pointer-sized unsigned value.
    pub fn load_ptr(&self, store: impl AsContext, ptr: u64) -> Result<u64> {
        match self.width {
            PointerWidth::W32 => self.read_array(store, ptr).map(|b| u32::from_le_bytes(b) as u64),
            PointerWidth::W64 => self.read_array(store, ptr).map(u64::from_le_bytes),
        }
    }

    /// Copy `len` bytes out of linear memory.
    pub fn load_raw(&self, store: impl AsContext, ptr: u64, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| access_error(ptr, usize::MAX))?;
        let mut buf = vec![0u8; len];
        self.memory
            .read(&store, to_offset(ptr, len)?, &mut buf)
            .map_err(|_| access_error(ptr, len))?;
        Ok(buf)
    }

    /// Load a NUL-terminated string.
    pub fn load_cstring(&self, store: impl AsContext, ptr: u64) -> Result<String> {
        let start = to_offset(ptr, 1)?;
        let data = self.memory.data(store.as_context());
        let tail = data.get(start..).ok_or_else(|| access_error(ptr, 1))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| access_error(ptr, tail.len()))?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    /// Load a `{data, size}` byte array header and the bytes it points to.
    pub fn load_byte_array(&self, store: impl AsContext, ptr: u64) -> Result<Vec<u8>> {
        let data = self.load_ptr(&store, ptr)?;
        let size = self.load_ptr(&store, ptr + self.sizeof_ptr())?;
        self.load_raw(&store, data, size)
    }

    /// Copy bytes into linear memory.
    pub fn store_raw(&self, mut store: impl AsContextMut, ptr: u64, bytes: &[u8]) -> Result<()> {
        self.memory
            .write(&mut store, to_offset(ptr, bytes.len())?, bytes)
            .map_err(|_| access_error(ptr, bytes.len()))
    }

    /// Store an `i32`.
    pub fn store_i32(&self, store: impl AsContextMut, ptr: u64, value: i32) -> Result<()> {
        self.store_raw(store, ptr, &value.to_le_bytes())
    }

    /// Store an `i64`.
    pub fn store_i64(&self, store: impl AsContextMut, ptr: u64, value: i64) -> Result<()> {
        self.store_raw(store, ptr, &value.to_le_bytes())
    }

    /// Store a pointer-sized value.
    pub fn store_ptr(&self, store: impl AsContextMut, ptr: u64, value: u64) -> Result<()> {
        match self.width {
            PointerWidth::W32 => self.store_raw(store, ptr, &(value as u32).to_le_bytes()),
            PointerWidth::W64 => self.store_raw(store, ptr, &value.to_le_bytes()),
        }
    }
}

fn to_offset(ptr: u64, len: usize) -> Result<usize> {
    usize::try_from(ptr).map_err(|_| access_error(ptr, len))
}

fn access_error(ptr: u64, len: usize) -> BridgeError {
    BridgeError::MemoryAccess {
        offset: ptr,
        len: len as u64,
    }
}
