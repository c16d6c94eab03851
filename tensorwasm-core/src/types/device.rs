//! Device contexts.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where tensor storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(i32)]
pub enum DeviceType {
    /// Host memory.
    Cpu = 1,
    /// CUDA device.
    Gpu = 2,
    /// OpenCL device.
    OpenCl = 4,
    /// Vulkan device.
    Vulkan = 7,
    /// Metal device.
    Metal = 8,
    /// WebGPU device. Work is queued and completes asynchronously.
    WebGpu = 15,
}

impl DeviceType {
    /// Decode the raw enum value stored in tensor headers and context slots.
    pub fn from_raw(raw: i32) -> Result<Self> {
        Ok(match raw {
            1 => Self::Cpu,
            2 => Self::Gpu,
            4 => Self::OpenCl,
            7 => Self::Vulkan,
            8 => Self::Metal,
            15 => Self::WebGpu,
            other => {
                return Err(BridgeError::UnknownDevice {
                    device: other.to_string(),
                });
            }
        })
    }

    /// Raw enum value.
    pub const fn raw(self) -> i32 {
        self as i32
    }

    /// Canonical short name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::OpenCl => "opencl",
            Self::Vulkan => "vulkan",
            Self::Metal => "metal",
            Self::WebGpu => "webgpu",
        }
    }

    /// Whether results on this device need an explicit sync before reads.
    pub const fn is_async(self) -> bool {
        matches!(self, Self::WebGpu)
    }
}

impl FromStr for DeviceType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "cpu" => Self::Cpu,
            "gpu" | "cuda" => Self::Gpu,
            "cl" | "opencl" => Self::OpenCl,
            "vulkan" => Self::Vulkan,
            "metal" => Self::Metal,
            "webgpu" => Self::WebGpu,
            _ => {
                return Err(BridgeError::UnknownDevice {
                    device: s.to_string(),
                });
            }
        })
    }
}

impl TryFrom<String> for DeviceType {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceType> for String {
    fn from(device: DeviceType) -> Self {
        device.name().to_string()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `(device type, device id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceContext {
    /// Device type.
    pub device_type: DeviceType,
    /// Device index.
    pub device_id: i32,
}

impl DeviceContext {
    /// Create a context.
    pub const fn new(device_type: DeviceType, device_id: i32) -> Self {
        Self {
            device_type,
            device_id,
        }
    }

    /// CPU context with the given id.
    pub const fn cpu(device_id: i32) -> Self {
        Self::new(DeviceType::Cpu, device_id)
    }

    /// WebGPU context with the given id.
    pub const fn webgpu(device_id: i32) -> Self {
        Self::new(DeviceType::WebGpu, device_id)
    }

    /// Decode raw `(type, id)` fields.
    pub fn from_raw(device_type: i32, device_id: i32) -> Result<Self> {
        Ok(Self::new(DeviceType::from_raw(device_type)?, device_id))
    }

    /// Whether this context is host memory.
    pub const fn is_cpu(&self) -> bool {
        matches!(self.device_type, DeviceType::Cpu)
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::cpu(0)
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.device_type, self.device_id)
    }
}
