//! Low-level link to a runtime module.
//!
//! - [`LinearMemory`]: typed access to linear memory
//! - [`FfiLibrary`]: the exported C API, with status checking
//! - [`CallStack`]: scratch space for marshaling call arguments

mod library;
mod memory;
mod stack;

pub use library::{FfiLibrary, REQUIRED_EXPORTS, detect_linear_memory, validate};
pub use memory::LinearMemory;
pub use stack::{CallStack, CallStackPool};

pub(crate) use library::{map_call_error, val_to_u64};
pub(crate) use stack::with_call_stack;
