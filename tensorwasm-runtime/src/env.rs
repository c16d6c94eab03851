//! The import set a module is linked against.
//!
//! Always provides the packed-function trampoline and its finalizer.
//! Everything else (WASI, a host-created memory, math shims, extra
//! definitions) is opt-in.

use crate::ffi::val_to_u64;
use crate::func_table::{invoke_host_func, release_host_func};
use crate::state::BridgeState;
use tensorwasm_core::error::{BridgeError, Result};
use wasmtime::{ExternType, Linker, Memory, MemoryType, Module, Store, Val};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::{self as p1, WasiP1Ctx};

const ENV: &str = "env";
const PACKED_CFUNC: &str = "TVMWasmPackedCFunc";
const PACKED_CFUNC_FINALIZER: &str = "TVMWasmPackedCFuncFinalizer";

type Registrar = Box<dyn FnOnce(&mut Linker<BridgeState>) -> anyhow::Result<()> + Send>;

/// Caller-supplied host environment for a module.
#[derive(Default)]
pub struct Imports {
    wasi: bool,
    inherit_stdio: bool,
    memory: Option<MemoryType>,
    math_shims: bool,
    trap_unknown: bool,
    registrars: Vec<Registrar>,
}

impl std::fmt::Debug for Imports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Imports")
            .field("wasi", &self.wasi)
            .field("inherit_stdio", &self.inherit_stdio)
            .field("memory", &self.memory)
            .field("math_shims", &self.math_shims)
            .field("trap_unknown", &self.trap_unknown)
            .field("registrars", &self.registrars.len())
            .finish()
    }
}

impl Imports {
    /// An import set with only the trampoline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link WASI preview1.
    pub fn with_wasi(mut self) -> Self {
        self.wasi = true;
        self
    }

    /// Link WASI preview1 with the host's stdin, stdout and stderr.
    pub fn with_inherited_stdio(mut self) -> Self {
        self.wasi = true;
        self.inherit_stdio = true;
        self
    }

    /// Provide `env.memory` with the given type.
    ///
    /// Without this, an imported memory is created from the module's own
    /// import declaration.
    pub fn with_memory(mut self, ty: MemoryType) -> Self {
        self.memory = Some(ty);
        self
    }

    /// Define `env.roundf` and `env.round`.
    pub fn with_math_shims(mut self) -> Self {
        self.math_shims = true;
        self
    }

    /// Satisfy any remaining unknown function imports with stubs that trap.
    pub fn trap_unknown_imports(mut self) -> Self {
        self.trap_unknown = true;
        self
    }

    /// Add arbitrary definitions to the linker.
    pub fn with_definitions<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Linker<BridgeState>) -> anyhow::Result<()> + Send + 'static,
    {
        self.registrars.push(Box::new(f));
        self
    }

    pub(crate) fn build_wasi(&self) -> WasiP1Ctx {
        let mut builder = WasiCtxBuilder::new();
        if self.inherit_stdio {
            builder.inherit_stdio();
        }
        builder.build_p1()
    }

    /// Populate `linker` for `module`, returning the memory created for
    /// `env.memory` if any.
    pub(crate) fn link(
        self,
        linker: &mut Linker<BridgeState>,
        store: &mut Store<BridgeState>,
        module: &Module,
        name: &str,
    ) -> Result<Option<Memory>> {
        let fail = |e: anyhow::Error| BridgeError::Instantiate {
            module: name.to_string(),
            cause: format!("{e:#}"),
        };

        if self.wasi {
            p1::add_to_linker_sync(linker, |s: &mut BridgeState| &mut s.wasi).map_err(fail)?;
        }

        let mut imported_memory = None;
        for import in module.imports() {
            if import.module() != ENV {
                continue;
            }
            match (import.name(), import.ty()) {
                (PACKED_CFUNC, ExternType::Func(ty)) => {
                    linker
                        .func_new(ENV, PACKED_CFUNC, ty, |mut caller, params, results| {
                            let arg = |i: usize| params.get(i).map(val_to_u64).unwrap_or(0);
                            let status = invoke_host_func(
                                &mut caller,
                                arg(0),
                                arg(1),
                                arg(2) as usize,
                                arg(3),
                                arg(4),
                            )?;
                            if let Some(slot) = results.first_mut() {
                                *slot = Val::I32(status);
                            }
                            Ok(())
                        })
                        .map_err(fail)?;
                }
                (PACKED_CFUNC_FINALIZER, ExternType::Func(ty)) => {
                    linker
                        .func_new(ENV, PACKED_CFUNC_FINALIZER, ty, |mut caller, params, _| {
                            let resource = params.first().map(val_to_u64).unwrap_or(0);
                            release_host_func(&mut caller, resource);
                            Ok(())
                        })
                        .map_err(fail)?;
                }
                ("memory", ExternType::Memory(ty)) => {
                    let ty = self.memory.clone().unwrap_or(ty);
                    let memory = Memory::new(&mut *store, ty).map_err(fail)?;
                    linker.define(&*store, ENV, "memory", memory).map_err(fail)?;
                    imported_memory = Some(memory);
                }
                _ => {}
            }
        }

        if self.math_shims {
            linker
                .func_wrap(ENV, "roundf", |x: f32| x.round())
                .map_err(fail)?;
            linker
                .func_wrap(ENV, "round", |x: f64| x.round())
                .map_err(fail)?;
        }

        for register in self.registrars {
            register(linker).map_err(fail)?;
        }

        if self.trap_unknown {
            linker.define_unknown_imports_as_traps(module).map_err(fail)?;
        }

        Ok(imported_memory)
    }
}
