//! Pointer width and tensor header layout.
//!
//! The header mirrors the C `DLTensor` struct as laid out by a wasm32 or
//! wasm64 compiler:
//!
//! | Field        | Offset          | Size |
//! |--------------|-----------------|------|
//! | data         | 0               | P    |
//! | device_type  | P               | 4    |
//! | device_id    | P + 4           | 4    |
//! | ndim         | P + 8           | 4    |
//! | dtype        | P + 12          | 4    |
//! | shape        | P + 16          | P    |
//! | strides      | P + 16 + P      | P    |
//! | byte_offset  | next 8-aligned  | 8    |

/// Address width of a module's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 32-bit addressing (`wasm32`).
    W32,
    /// 64-bit addressing (`memory64`).
    W64,
}

impl PointerWidth {
    /// Pick the width from a memory's addressing mode.
    pub const fn from_is_64(is_64: bool) -> Self {
        if is_64 { Self::W64 } else { Self::W32 }
    }

    /// Size of a pointer in bytes.
    pub const fn bytes(self) -> u64 {
        match self {
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }
}

/// Byte offsets of every tensor header field for one pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLayout {
    /// Pointer width the offsets were computed for.
    pub width: PointerWidth,
    /// `data` pointer.
    pub data: u64,
    /// `device_type` int32.
    pub device_type: u64,
    /// `device_id` int32.
    pub device_id: u64,
    /// `ndim` int32.
    pub ndim: u64,
    /// dtype code (u8).
    pub dtype_code: u64,
    /// dtype bits (u8).
    pub dtype_bits: u64,
    /// dtype lanes (u16).
    pub dtype_lanes: u64,
    /// `shape` pointer to `ndim` int64 values.
    pub shape: u64,
    /// `strides` pointer, may be null.
    pub strides: u64,
    /// `byte_offset` uint64.
    pub byte_offset: u64,
    /// Total header size.
    pub size: u64,
}

impl TensorLayout {
    /// Compute the layout for a pointer width.
    pub const fn new(width: PointerWidth) -> Self {
        let p = width.bytes();
        let strides = p + 16 + p;
        let byte_offset = (strides + p + 7) & !7;
        Self {
            width,
            data: 0,
            device_type: p,
            device_id: p + 4,
            ndim: p + 8,
            dtype_code: p + 12,
            dtype_bits: p + 13,
            dtype_lanes: p + 14,
            shape: p + 16,
            strides,
            byte_offset,
            size: byte_offset + 8,
        }
    }
}
