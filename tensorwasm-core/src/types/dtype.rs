//! Runtime data type descriptors.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type class of a [`DataType`], as stored in the tensor header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataTypeCode {
    /// Signed integer.
    Int = 0,
    /// Unsigned integer.
    UInt = 1,
    /// IEEE float.
    Float = 2,
    /// Opaque pointer.
    Handle = 3,
}

impl DataTypeCode {
    /// Decode a raw code byte.
    pub fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Int),
            1 => Some(Self::UInt),
            2 => Some(Self::Float),
            3 => Some(Self::Handle),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Handle => "handle",
        }
    }
}

/// A `(code, bits, lanes)` triple describing one tensor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataType {
    /// Type class.
    pub code: DataTypeCode,
    /// Bits per lane.
    pub bits: u8,
    /// Vector lanes.
    pub lanes: u16,
}

impl DataType {
    /// `int8`
    pub const INT8: Self = Self::new(DataTypeCode::Int, 8, 1);
    /// `uint8`
    pub const UINT8: Self = Self::new(DataTypeCode::UInt, 8, 1);
    /// `int32`
    pub const INT32: Self = Self::new(DataTypeCode::Int, 32, 1);
    /// `int64`
    pub const INT64: Self = Self::new(DataTypeCode::Int, 64, 1);
    /// `float32`
    pub const FLOAT32: Self = Self::new(DataTypeCode::Float, 32, 1);
    /// `float64`
    pub const FLOAT64: Self = Self::new(DataTypeCode::Float, 64, 1);

    /// Create a data type from its parts.
    pub const fn new(code: DataTypeCode, bits: u8, lanes: u16) -> Self {
        Self { code, bits, lanes }
    }

    /// Decode the raw header fields.
    pub fn from_raw(code: u8, bits: u8, lanes: u16) -> Result<Self> {
        let code = DataTypeCode::from_raw(code).ok_or_else(|| {
            BridgeError::unknown_dtype(format!("code={code} bits={bits} lanes={lanes}"))
        })?;
        Ok(Self::new(code, bits, lanes))
    }

    /// Bytes occupied by one element: `ceil(bits * lanes / 8)`.
    pub const fn storage_bytes(&self) -> u64 {
        (self.bits as u64 * self.lanes as u64 + 7) >> 3
    }

    /// The host element type that matches this dtype exactly.
    pub fn element_type(&self) -> Result<ElementType> {
        ElementType::from_dtype(*self).ok_or_else(|| BridgeError::unknown_dtype(self.to_string()))
    }
}

impl FromStr for DataType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let (code, rest, default_bits) = if let Some(rest) = s.strip_prefix("float") {
            (DataTypeCode::Float, rest, 32)
        } else if let Some(rest) = s.strip_prefix("int") {
            (DataTypeCode::Int, rest, 32)
        } else if let Some(rest) = s.strip_prefix("uint") {
            (DataTypeCode::UInt, rest, 32)
        } else if let Some(rest) = s.strip_prefix("handle") {
            (DataTypeCode::Handle, rest, 64)
        } else {
            return Err(BridgeError::unknown_dtype(s));
        };

        let mut parts = rest.splitn(2, 'x');
        let bits = match parts.next() {
            None | Some("") => default_bits,
            Some(b) => b.parse::<u8>().map_err(|_| BridgeError::unknown_dtype(s))?,
        };
        let lanes = match parts.next() {
            None => 1,
            Some(l) => l.parse::<u16>().map_err(|_| BridgeError::unknown_dtype(s))?,
        };
        if bits == 0 || lanes == 0 {
            return Err(BridgeError::unknown_dtype(s));
        }
        Ok(Self::new(code, bits, lanes))
    }
}

impl TryFrom<String> for DataType {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(dtype: DataType) -> Self {
        dtype.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == DataTypeCode::Handle && self.bits == 64 && self.lanes == 1 {
            return f.write_str("handle");
        }
        write!(f, "{}{}", self.code.prefix(), self.bits)?;
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

/// Element types that have a typed host representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// `int8`
    Int8,
    /// `uint8`
    UInt8,
    /// `int32`
    Int32,
    /// `float32`
    Float32,
    /// `float64`
    Float64,
}

impl ElementType {
    /// Map a dtype to its host element type, if it has one.
    pub fn from_dtype(dtype: DataType) -> Option<Self> {
        match (dtype.code, dtype.bits, dtype.lanes) {
            (DataTypeCode::Int, 8, 1) => Some(Self::Int8),
            (DataTypeCode::UInt, 8, 1) => Some(Self::UInt8),
            (DataTypeCode::Int, 32, 1) => Some(Self::Int32),
            (DataTypeCode::Float, 32, 1) => Some(Self::Float32),
            (DataTypeCode::Float, 64, 1) => Some(Self::Float64),
            _ => None,
        }
    }

    /// The dtype this element type encodes.
    pub const fn dtype(self) -> DataType {
        match self {
            Self::Int8 => DataType::INT8,
            Self::UInt8 => DataType::UINT8,
            Self::Int32 => DataType::INT32,
            Self::Float32 => DataType::FLOAT32,
            Self::Float64 => DataType::FLOAT64,
        }
    }

    /// Bytes per element.
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dtype().fmt(f)
    }
}
