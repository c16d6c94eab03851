//! Error types for TensorWasm.
//!
//! Every failure the bridge can surface is a variant of [`BridgeError`].
//! Messages carry a stable code so log lines can be grepped across
//! releases, and each variant names the symbol, dtype or device involved.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    // =========================================================================
    // Setup Errors (E100-E199)
    // =========================================================================
    /// The module does not export one or more required entry points.
    #[error("E101: Cannot find {} in module exports", names.join(", "))]
    MissingExport {
        /// Every absent symbol, in the order they were checked.
        names: Vec<String>,
    },

    /// Neither the exports nor the imports expose a linear memory.
    #[error("E102: Cannot detect linear memory from module exports or env imports")]
    MemoryNotFound,

    /// Failed to compile a module binary.
    #[error("E103: Failed to compile module '{module}': {cause}")]
    Compile {
        /// Module name (file name or caller supplied label).
        module: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Failed to link or instantiate a compiled module.
    #[error("E104: Failed to instantiate module '{module}': {cause}")]
    Instantiate {
        /// Module name.
        module: String,
        /// Reason for the failure.
        cause: String,
    },

    /// A device sync was requested for a device with no registered hook.
    #[error("E105: No synchronization hook registered for asynchronous device {device}")]
    DeviceUnavailable {
        /// The device context, rendered as `name(id)`.
        device: String,
    },

    // =========================================================================
    // Calling Convention Errors (E200-E299)
    // =========================================================================
    /// A checked call returned a nonzero status code.
    #[error("E201: TVMError: {message}")]
    ModuleError {
        /// Message read from the module's last-error accessor.
        message: String,
    },

    /// An argument has no encoding in the packed calling convention.
    #[error("E202: Unsupported argument type {type_name}")]
    UnsupportedArgumentType {
        /// Description of the rejected argument.
        type_name: String,
    },

    /// The module returned a type code the bridge cannot decode.
    #[error("E203: Unsupported return type code={code}")]
    UnsupportedReturnType {
        /// The raw type code.
        code: i32,
    },

    /// Module code trapped while the bridge was calling into it.
    #[error("E204: Trap in '{function}': {cause}")]
    Trap {
        /// Export that was being called.
        function: String,
        /// Trap description.
        cause: String,
    },

    /// An access fell outside the module's linear memory.
    #[error("E205: Invalid linear memory access at 0x{offset:08x} ({len} bytes)")]
    MemoryAccess {
        /// Start address of the access.
        offset: u64,
        /// Number of bytes requested.
        len: u64,
    },

    /// An async host function broke the one-shot reply contract.
    #[error("E206: Async contract violated for '{function}': {cause}")]
    AsyncContract {
        /// Registered function name.
        function: String,
        /// What went wrong.
        cause: String,
    },

    // =========================================================================
    // Tensor Errors (E300-E399)
    // =========================================================================
    /// Host data length does not match the tensor's element count.
    #[error("E301: Data size and shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Product of the tensor shape.
        expected: u64,
        /// Length of the supplied host array.
        actual: u64,
    },

    /// Raw byte input does not match the tensor's storage size.
    #[error("E302: Expect the data's length equals nbytes={expected}, got {actual}")]
    ByteLengthMismatch {
        /// Storage bytes of the tensor.
        expected: u64,
        /// Supplied byte length.
        actual: u64,
    },

    /// Host-side reads are only possible for CPU-resident tensors.
    #[error("E303: Cannot synchronously copy a tensor on {device} to the host, copy it to a cpu tensor first")]
    UnsupportedDeviceCopy {
        /// The tensor's device context.
        device: String,
    },

    /// The dtype string or descriptor is not recognized.
    #[error("E304: Unknown dtype {dtype}")]
    UnknownDType {
        /// The rejected dtype.
        dtype: String,
    },

    /// The device name is not recognized.
    #[error("E305: Cannot recognize device type {device}")]
    UnknownDevice {
        /// The rejected device name.
        device: String,
    },

    /// A shape entry is negative or otherwise invalid.
    #[error("E306: Invalid shape {shape:?}: {cause}")]
    InvalidShape {
        /// The rejected shape.
        shape: Vec<i64>,
        /// Why it was rejected.
        cause: String,
    },

    /// A handle was used after it was disposed.
    #[error("E307: Use of {what} after dispose")]
    UseAfterDispose {
        /// What kind of handle was used.
        what: &'static str,
    },

    // =========================================================================
    // Registry/Executor Errors (E400-E499)
    // =========================================================================
    /// A module returned a null handle for the requested function.
    #[error("E401: Cannot find function {name}")]
    FunctionNotFound {
        /// Function name.
        name: String,
    },

    /// A global symbol is not registered.
    #[error("E402: Cannot find global function {name}")]
    SymbolNotFound {
        /// Global name.
        name: String,
    },

    /// Graph executor used before its parameters were loaded.
    #[error("E403: Graph executor is not ready: {operation} called before load_params")]
    NotReady {
        /// The operation that was attempted.
        operation: &'static str,
    },

    // =========================================================================
    // Artifact Errors (E500-E599)
    // =========================================================================
    /// An artifact bundle is malformed.
    #[error("E501: Invalid artifact bundle at {path}: {cause}")]
    Artifact {
        /// Bundle directory or file.
        path: PathBuf,
        /// Description of the problem.
        cause: String,
    },

    /// Filesystem failure while reading artifacts.
    #[error("E502: I/O error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    /// Create a module error from a message.
    pub fn module(message: impl Into<String>) -> Self {
        Self::ModuleError {
            message: message.into(),
        }
    }

    /// Create an unsupported-argument error.
    pub fn unsupported_argument(type_name: impl Into<String>) -> Self {
        Self::UnsupportedArgumentType {
            type_name: type_name.into(),
        }
    }

    /// Create an unknown-dtype error.
    pub fn unknown_dtype(dtype: impl Into<String>) -> Self {
        Self::UnknownDType {
            dtype: dtype.into(),
        }
    }

    /// Whether this error came from the module's own status code.
    pub fn is_module_error(&self) -> bool {
        matches!(self, Self::ModuleError { .. })
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_export_lists_every_symbol() {
        let err = BridgeError::MissingExport {
            names: vec!["TVMFuncCall".into(), "TVMArrayAlloc".into()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("E101"));
        assert!(msg.contains("TVMFuncCall, TVMArrayAlloc"));
    }

    #[test]
    fn module_error_carries_message() {
        let err = BridgeError::module("invalid parameters file format");
        assert!(err.is_module_error());
        assert_eq!(
            err.to_string(),
            "E201: TVMError: invalid parameters file format"
        );
    }

    #[test]
    fn shape_mismatch_reports_both_counts() {
        let err = BridgeError::ShapeMismatch {
            expected: 6,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 6"));
        assert!(msg.contains("got 5"));
    }
}
