//! Raw link to an instantiated runtime module.
//!
//! [`FfiLibrary`] holds the exported C API entry points and the linear
//! memory. All status-returning entries go through [`FfiLibrary::check_call`],
//! which turns a nonzero code into [`BridgeError::ModuleError`] carrying
//! the module's last error message.

use super::memory::LinearMemory;
use tensorwasm_core::error::{BridgeError, Result};
use tensorwasm_core::types::PointerWidth;
use wasmtime::{AsContextMut, Func, Instance, Memory, Val};

/// Entry points every runtime module must export.
pub const REQUIRED_EXPORTS: &[&str] = &[
    "TVMWasmAllocSpace",
    "TVMWasmFreeSpace",
    "TVMFuncFree",
    "TVMGetLastError",
    "TVMFuncCall",
    "TVMFuncGetGlobal",
    "TVMFuncRegisterGlobal",
    "TVMFuncListGlobalNames",
    "TVMModGetFunction",
    "TVMModImport",
    "TVMModFree",
    "TVMArrayAlloc",
    "TVMArrayFree",
    "TVMArrayCopyFromBytes",
    "TVMArrayCopyToBytes",
    "TVMArrayCopyFromTo",
    "TVMCbArgToReturn",
    "TVMCFuncSetReturn",
    "TVMWasmFuncCreateFromCFunc",
];

#[derive(Debug, Clone, Copy)]
struct Exports {
    alloc_space: Func,
    free_space: Func,
    func_free: Func,
    get_last_error: Func,
    func_call: Func,
    func_get_global: Func,
    func_register_global: Func,
    func_list_global_names: Func,
    mod_get_function: Func,
    mod_import: Func,
    mod_free: Func,
    array_alloc: Func,
    array_free: Func,
    array_copy_from_bytes: Func,
    array_copy_to_bytes: Func,
    array_copy_from_to: Func,
    cb_arg_to_return: Func,
    cfunc_set_return: Func,
    func_create_from_cfunc: Func,
}

/// Exported entry points plus linear memory of one module instance.
#[derive(Debug, Clone, Copy)]
pub struct FfiLibrary {
    memory: LinearMemory,
    exports: Exports,
}

impl FfiLibrary {
    /// Bind an instance, failing if memory or any required export is missing.
    pub fn new(
        mut store: impl AsContextMut,
        instance: &Instance,
        imported_memory: Option<Memory>,
    ) -> Result<Self> {
        let memory = detect_linear_memory(&mut store, instance, imported_memory)?;
        let memory = LinearMemory::new(&store, memory);
        validate(&mut store, instance, REQUIRED_EXPORTS)?;

        let mut get = |name: &str| {
            instance
                .get_func(&mut store, name)
                .ok_or_else(|| BridgeError::MissingExport {
                    names: vec![name.to_string()],
                })
        };
        let exports = Exports {
            alloc_space: get("TVMWasmAllocSpace")?,
            free_space: get("TVMWasmFreeSpace")?,
            func_free: get("TVMFuncFree")?,
            get_last_error: get("TVMGetLastError")?,
            func_call: get("TVMFuncCall")?,
            func_get_global: get("TVMFuncGetGlobal")?,
            func_register_global: get("TVMFuncRegisterGlobal")?,
            func_list_global_names: get("TVMFuncListGlobalNames")?,
            mod_get_function: get("TVMModGetFunction")?,
            mod_import: get("TVMModImport")?,
            mod_free: get("TVMModFree")?,
            array_alloc: get("TVMArrayAlloc")?,
            array_free: get("TVMArrayFree")?,
            array_copy_from_bytes: get("TVMArrayCopyFromBytes")?,
            array_copy_to_bytes: get("TVMArrayCopyToBytes")?,
            array_copy_from_to: get("TVMArrayCopyFromTo")?,
            cb_arg_to_return: get("TVMCbArgToReturn")?,
            cfunc_set_return: get("TVMCFuncSetReturn")?,
            func_create_from_cfunc: get("TVMWasmFuncCreateFromCFunc")?,
        };

        Ok(Self { memory, exports })
    }

    /// Linear memory accessor.
    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    /// Pointer width of the module.
    pub fn width(&self) -> PointerWidth {
        self.memory.width()
    }

    /// Size of a pointer in bytes.
    pub fn sizeof_ptr(&self) -> u64 {
        self.memory.sizeof_ptr()
    }

    /// Encode a pointer-sized argument for the module's addressing mode.
    pub fn ptr_val(&self, value: u64) -> Val {
        match self.width() {
            PointerWidth::W32 => Val::I32(value as u32 as i32),
            PointerWidth::W64 => Val::I64(value as i64),
        }
    }

    fn invoke(
        &self,
        mut store: impl AsContextMut,
        func: Func,
        name: &'static str,
        params: &[Val],
    ) -> Result<Option<Val>> {
        let count = func.ty(&store).results().len();
        let mut results = vec![Val::I32(0); count];
        func.call(&mut store, params, &mut results)
            .map_err(|e| map_call_error(name, e))?;
        Ok(results.into_iter().next())
    }

    fn checked(
        &self,
        mut store: impl AsContextMut,
        func: Func,
        name: &'static str,
        params: &[Val],
    ) -> Result<()> {
        let code = self
            .invoke(&mut store, func, name, params)?
            .and_then(|v| v.i32())
            .unwrap_or(0);
        self.check_call(store, code)
    }

    /// Turn a nonzero status code into [`BridgeError::ModuleError`].
    pub fn check_call(&self, mut store: impl AsContextMut, code: i32) -> Result<()> {
        if code == 0 {
            return Ok(());
        }
        let msg_ptr = self
            .invoke(&mut store, self.exports.get_last_error, "TVMGetLastError", &[])?
            .map(|v| val_to_u64(&v))
            .unwrap_or(0);
        let message = if msg_ptr == 0 {
            format!("status code {code}")
        } else {
            self.memory.load_cstring(&store, msg_ptr)?
        };
        tracing::debug!(code, message = %message, "Module call failed");
        Err(BridgeError::ModuleError { message })
    }

    /// `TVMWasmAllocSpace(size) -> ptr`
    pub fn alloc_space(&self, mut store: impl AsContextMut, size: u64) -> Result<u64> {
        let size = i32::try_from(size).map_err(|_| BridgeError::MemoryAccess {
            offset: 0,
            len: size,
        })?;
        let ptr = self
            .invoke(&mut store, self.exports.alloc_space, "TVMWasmAllocSpace", &[Val::I32(size)])?
            .map(|v| val_to_u64(&v))
            .unwrap_or(0);
        if ptr == 0 && size > 0 {
            return Err(BridgeError::MemoryAccess {
                offset: 0,
                len: size as u64,
            });
        }
        Ok(ptr)
    }

    /// `TVMWasmFreeSpace(ptr)`
    pub fn free_space(&self, store: impl AsContextMut, ptr: u64) -> Result<()> {
        self.invoke(store, self.exports.free_space, "TVMWasmFreeSpace", &[self.ptr_val(ptr)])
            .map(drop)
    }

    /// `TVMFuncFree(handle)`
    pub fn func_free(&self, store: impl AsContextMut, handle: u64) -> Result<()> {
        self.checked(store, self.exports.func_free, "TVMFuncFree", &[self.ptr_val(handle)])
    }

    /// `TVMFuncCall(handle, values, codes, nargs, ret_value, ret_code)`
    #[allow(clippy::too_many_arguments)]
    pub fn func_call(
        &self,
        store: impl AsContextMut,
        handle: u64,
        values: u64,
        codes: u64,
        nargs: usize,
        ret_value: u64,
        ret_code: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.func_call,
            "TVMFuncCall",
            &[
                self.ptr_val(handle),
                self.ptr_val(values),
                self.ptr_val(codes),
                Val::I32(nargs as i32),
                self.ptr_val(ret_value),
                self.ptr_val(ret_code),
            ],
        )
    }

    /// `TVMFuncGetGlobal(name, out)`
    pub fn func_get_global(&self, store: impl AsContextMut, name: u64, out: u64) -> Result<()> {
        self.checked(
            store,
            self.exports.func_get_global,
            "TVMFuncGetGlobal",
            &[self.ptr_val(name), self.ptr_val(out)],
        )
    }

    /// `TVMFuncRegisterGlobal(name, handle, override)`
    pub fn func_register_global(
        &self,
        store: impl AsContextMut,
        name: u64,
        handle: u64,
        override_existing: bool,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.func_register_global,
            "TVMFuncRegisterGlobal",
            &[
                self.ptr_val(name),
                self.ptr_val(handle),
                Val::I32(override_existing as i32),
            ],
        )
    }

    /// `TVMFuncListGlobalNames(out_size, out_array)`
    pub fn func_list_global_names(
        &self,
        store: impl AsContextMut,
        out_size: u64,
        out_array: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.func_list_global_names,
            "TVMFuncListGlobalNames",
            &[self.ptr_val(out_size), self.ptr_val(out_array)],
        )
    }

    /// `TVMModGetFunction(module, name, query_imports, out)`
    pub fn mod_get_function(
        &self,
        store: impl AsContextMut,
        module: u64,
        name: u64,
        out: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.mod_get_function,
            "TVMModGetFunction",
            &[
                self.ptr_val(module),
                self.ptr_val(name),
                Val::I32(1),
                self.ptr_val(out),
            ],
        )
    }

    /// `TVMModImport(module, dep)`
    pub fn mod_import(&self, store: impl AsContextMut, module: u64, dep: u64) -> Result<()> {
        self.checked(
            store,
            self.exports.mod_import,
            "TVMModImport",
            &[self.ptr_val(module), self.ptr_val(dep)],
        )
    }

    /// `TVMModFree(module)`
    pub fn mod_free(&self, store: impl AsContextMut, module: u64) -> Result<()> {
        self.checked(store, self.exports.mod_free, "TVMModFree", &[self.ptr_val(module)])
    }

    /// `TVMArrayAlloc(shape, ndim, code, bits, lanes, device_type, device_id, out)`
    #[allow(clippy::too_many_arguments)]
    pub fn array_alloc(
        &self,
        store: impl AsContextMut,
        shape: u64,
        ndim: usize,
        dtype: (u8, u8, u16),
        device: (i32, i32),
        out: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.array_alloc,
            "TVMArrayAlloc",
            &[
                self.ptr_val(shape),
                Val::I32(ndim as i32),
                Val::I32(dtype.0 as i32),
                Val::I32(dtype.1 as i32),
                Val::I32(dtype.2 as i32),
                Val::I32(device.0),
                Val::I32(device.1),
                self.ptr_val(out),
            ],
        )
    }

    /// `TVMArrayFree(handle)`
    pub fn array_free(&self, store: impl AsContextMut, handle: u64) -> Result<()> {
        self.checked(store, self.exports.array_free, "TVMArrayFree", &[self.ptr_val(handle)])
    }

    /// `TVMArrayCopyFromBytes(handle, data, nbytes)`
    pub fn array_copy_from_bytes(
        &self,
        store: impl AsContextMut,
        handle: u64,
        data: u64,
        nbytes: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.array_copy_from_bytes,
            "TVMArrayCopyFromBytes",
            &[self.ptr_val(handle), self.ptr_val(data), self.ptr_val(nbytes)],
        )
    }

    /// `TVMArrayCopyToBytes(handle, data, nbytes)`
    pub fn array_copy_to_bytes(
        &self,
        store: impl AsContextMut,
        handle: u64,
        data: u64,
        nbytes: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.array_copy_to_bytes,
            "TVMArrayCopyToBytes",
            &[self.ptr_val(handle), self.ptr_val(data), self.ptr_val(nbytes)],
        )
    }

    /// `TVMArrayCopyFromTo(from, to, stream)`
    pub fn array_copy_from_to(&self, store: impl AsContextMut, from: u64, to: u64) -> Result<()> {
        self.checked(
            store,
            self.exports.array_copy_from_to,
            "TVMArrayCopyFromTo",
            &[self.ptr_val(from), self.ptr_val(to), self.ptr_val(0)],
        )
    }

    /// `TVMCbArgToReturn(value, code)`
    pub fn cb_arg_to_return(&self, store: impl AsContextMut, value: u64, code: u64) -> Result<()> {
        self.checked(
            store,
            self.exports.cb_arg_to_return,
            "TVMCbArgToReturn",
            &[self.ptr_val(value), self.ptr_val(code)],
        )
    }

    /// `TVMCFuncSetReturn(ret, values, codes, nret)`
    pub fn cfunc_set_return(
        &self,
        store: impl AsContextMut,
        ret: u64,
        value: u64,
        code: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.cfunc_set_return,
            "TVMCFuncSetReturn",
            &[
                self.ptr_val(ret),
                self.ptr_val(value),
                self.ptr_val(code),
                Val::I32(1),
            ],
        )
    }

    /// `TVMWasmFuncCreateFromCFunc(resource, out)`
    pub fn func_create_from_cfunc(
        &self,
        store: impl AsContextMut,
        resource: u64,
        out: u64,
    ) -> Result<()> {
        self.checked(
            store,
            self.exports.func_create_from_cfunc,
            "TVMWasmFuncCreateFromCFunc",
            &[self.ptr_val(resource), self.ptr_val(out)],
        )
    }
}

/// Fail with every missing name if any export in `names` is absent or not a function.
pub fn validate(mut store: impl AsContextMut, instance: &Instance, names: &[&str]) -> Result<()> {
    let missing: Vec<String> = names
        .iter()
        .filter(|name| instance.get_func(&mut store, name).is_none())
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BridgeError::MissingExport { names: missing })
    }
}

/// Locate linear memory from the exports first, then the env imports.
pub fn detect_linear_memory(
    mut store: impl AsContextMut,
    instance: &Instance,
    imported_memory: Option<Memory>,
) -> Result<Memory> {
    instance
        .get_memory(&mut store, "memory")
        .or(imported_memory)
        .ok_or(BridgeError::MemoryNotFound)
}

/// Read a pointer or integer from an `i32`/`i64` value.
pub(crate) fn val_to_u64(val: &Val) -> u64 {
    match val {
        Val::I32(v) => *v as u32 as u64,
        Val::I64(v) => *v as u64,
        _ => 0,
    }
}

/// Recover a bridge error raised by a host callback, or wrap the trap.
pub(crate) fn map_call_error(function: &str, err: anyhow::Error) -> BridgeError {
    match err.downcast::<BridgeError>() {
        Ok(inner) => inner,
        Err(err) => BridgeError::Trap {
            function: function.to_string(),
            cause: format!("{err:#}"),
        },
    }
}
