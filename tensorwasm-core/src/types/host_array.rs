//! Typed host buffers that can be copied into and out of tensors.

use super::dtype::ElementType;
use crate::error::{BridgeError, Result};

/// A host-side array of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum HostArray {
    /// `int8` elements.
    Int8(Vec<i8>),
    /// `uint8` elements.
    UInt8(Vec<u8>),
    /// `int32` elements.
    Int32(Vec<i32>),
    /// `float32` elements.
    Float32(Vec<f32>),
    /// `float64` elements.
    Float64(Vec<f64>),
}

macro_rules! from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for HostArray {
                fn from(v: Vec<$ty>) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

from_vec!(i8 => Int8, u8 => UInt8, i32 => Int32, f32 => Float32, f64 => Float64);

impl HostArray {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Int8(v) => v.len(),
            Self::UInt8(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of the buffer.
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Int8(_) => ElementType::Int8,
            Self::UInt8(_) => ElementType::UInt8,
            Self::Int32(_) => ElementType::Int32,
            Self::Float32(_) => ElementType::Float32,
            Self::Float64(_) => ElementType::Float64,
        }
    }

    /// A `len`-element array of `value` converted to `element_type`.
    pub fn filled(element_type: ElementType, len: usize, value: f64) -> Self {
        match element_type {
            ElementType::Int8 => Self::Int8(vec![value as i8; len]),
            ElementType::UInt8 => Self::UInt8(vec![value as u8; len]),
            ElementType::Int32 => Self::Int32(vec![value as i32; len]),
            ElementType::Float32 => Self::Float32(vec![value as f32; len]),
            ElementType::Float64 => Self::Float64(vec![value; len]),
        }
    }

    /// Elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Self::Int8(v) => v.iter().map(|&x| x as f64).collect(),
            Self::UInt8(v) => v.iter().map(|&x| x as f64).collect(),
            Self::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            Self::Float32(v) => v.iter().map(|&x| x as f64).collect(),
            Self::Float64(v) => v.clone(),
        }
    }

    /// Little-endian bytes after converting every element to `target`.
    ///
    /// Same-type encoding is a straight copy. Cross-type encoding goes
    /// through `f64`: integer targets truncate toward zero and wrap modulo
    /// the target width, with NaN and infinities stored as 0.
    pub fn encode_as(&self, target: ElementType) -> Vec<u8> {
        if target == self.element_type() {
            return self.to_le_bytes();
        }
        let values = self.to_f64_vec();
        let mut out = Vec::with_capacity(values.len() * target.size());
        for x in values {
            match target {
                ElementType::Int8 => out.extend_from_slice(&(wrapping_int(x) as i8).to_le_bytes()),
                ElementType::UInt8 => out.push(wrapping_int(x) as u8),
                ElementType::Int32 => out.extend_from_slice(&(wrapping_int(x) as i32).to_le_bytes()),
                ElementType::Float32 => out.extend_from_slice(&(x as f32).to_le_bytes()),
                ElementType::Float64 => out.extend_from_slice(&x.to_le_bytes()),
            }
        }
        out
    }

    /// Little-endian bytes of the buffer as stored.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int8(v) => v.iter().map(|&x| x as u8).collect(),
            Self::UInt8(v) => v.clone(),
            Self::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Self::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Self::Float64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Reinterpret little-endian bytes as `element_type`.
    pub fn from_le_bytes(element_type: ElementType, bytes: &[u8]) -> Result<Self> {
        let size = element_type.size();
        if bytes.len() % size != 0 {
            return Err(BridgeError::ByteLengthMismatch {
                expected: (bytes.len() / size * size) as u64,
                actual: bytes.len() as u64,
            });
        }
        let chunks = bytes.chunks_exact(size);
        Ok(match element_type {
            ElementType::Int8 => Self::Int8(bytes.iter().map(|&b| b as i8).collect()),
            ElementType::UInt8 => Self::UInt8(bytes.to_vec()),
            ElementType::Int32 => Self::Int32(
                chunks
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            ElementType::Float32 => Self::Float32(
                chunks
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            ElementType::Float64 => Self::Float64(
                chunks
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        })
    }
}

/// Integer part of `x`, 0 when not finite. Narrowing `as` casts then wrap.
fn wrapping_int(x: f64) -> i64 {
    if x.is_finite() { x.trunc() as i64 } else { 0 }
}
