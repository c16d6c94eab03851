//! Scratch call stacks used to marshal arguments.
//!
//! A [`CallStack`] is bump allocated on the host side and flushed into a
//! region of linear memory by [`CallStack::commit`]. Pointers into the
//! region are only meaningful after a commit, because growing the stack
//! may move the region. Writes that embed such pointers (string and byte
//! arguments) are recorded as fix-ups and resolved at commit time.
//!
//! Stacks are pooled per instance. [`with_call_stack`] takes one out of the
//! pool for a single marshaling operation and always returns it, reset,
//! whether or not the operation failed.

use super::library::FfiLibrary;
use crate::module::PackedFunc;
use crate::state::{BridgeState, library};
use tensorwasm_core::error::Result;
use tensorwasm_core::types::PointerWidth;
use wasmtime::AsContextMut;

/// Alignment of every allocation.
const ALIGN: usize = 8;

/// One resettable scratch region.
#[derive(Debug)]
pub struct CallStack {
    /// Host-side image of the region.
    buffer: Vec<u8>,
    /// Bump pointer, as an offset into `buffer`.
    stack_top: usize,
    /// Start of the region in linear memory, 0 until first commit.
    base_ptr: u64,
    /// Bytes reserved at `base_ptr`.
    wasm_capacity: usize,
    /// `(target, value)` offsets: store the address of `value` at `target`.
    fixups: Vec<(usize, usize)>,
    /// Callables that must live until the call completes.
    temp_args: Vec<PackedFunc>,
    width: PointerWidth,
}

impl CallStack {
    /// Create an empty stack with `capacity` bytes of host buffer.
    pub fn new(width: PointerWidth, capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(ALIGN)],
            stack_top: 0,
            base_ptr: 0,
            wasm_capacity: 0,
            fixups: Vec::new(),
            temp_args: Vec::new(),
            width,
        }
    }

    /// Bytes allocated so far.
    pub fn top(&self) -> usize {
        self.stack_top
    }

    /// Current capacity of the host buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Allocate `nbytes`, rounded up to 8, and return the offset.
    ///
    /// Grows to `max(2 * capacity, needed)` when full.
    pub fn alloc_raw_bytes(&mut self, nbytes: usize) -> usize {
        let nbytes = nbytes.div_ceil(ALIGN) * ALIGN;
        let needed = self.stack_top + nbytes;
        if needed > self.buffer.len() {
            let new_size = (self.buffer.len() * 2).max(needed);
            self.buffer.resize(new_size, 0);
        }
        let offset = self.stack_top;
        self.stack_top = needed;
        offset
    }

    /// Allocate space for `count` pointers.
    pub fn alloc_ptr_array(&mut self, count: usize) -> usize {
        self.alloc_raw_bytes(self.width.bytes() as usize * count)
    }

    /// Write raw bytes at `offset`.
    pub fn store_raw(&mut self, offset: usize, bytes: &[u8]) {
        self.buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Write an `i32`.
    pub fn store_i32(&mut self, offset: usize, value: i32) {
        self.store_raw(offset, &value.to_le_bytes());
    }

    /// Write an `i64`.
    pub fn store_i64(&mut self, offset: usize, value: i64) {
        self.store_raw(offset, &value.to_le_bytes());
    }

    /// Write an `f64`.
    pub fn store_f64(&mut self, offset: usize, value: f64) {
        self.store_raw(offset, &value.to_le_bytes());
    }

    /// Write a pointer-sized value.
    pub fn store_ptr(&mut self, offset: usize, value: u64) {
        match self.width {
            PointerWidth::W32 => self.store_raw(offset, &(value as u32).to_le_bytes()),
            PointerWidth::W64 => self.store_raw(offset, &value.to_le_bytes()),
        }
    }

    /// Copy `s` plus a NUL terminator into the stack and return its offset.
    pub fn alloc_cstring(&mut self, s: &str) -> usize {
        let offset = self.alloc_raw_bytes(s.len() + 1);
        self.store_raw(offset, s.as_bytes());
        self.buffer[offset + s.len()] = 0;
        offset
    }

    /// Store `s` in the stack and point the value slot at `offset` to it.
    pub fn alloc_then_set_arg_string(&mut self, offset: usize, s: &str) {
        self.store_i64(offset, 0);
        let str_offset = self.alloc_cstring(s);
        self.fixups.push((offset, str_offset));
    }

    /// Store `data` behind a `{data, size}` header and point `offset` at the header.
    pub fn alloc_then_set_arg_bytes(&mut self, offset: usize, data: &[u8]) {
        let ptr = self.width.bytes() as usize;
        self.store_i64(offset, 0);
        let header = self.alloc_raw_bytes(ptr * 2);
        let data_offset = self.alloc_raw_bytes(data.len());
        self.store_raw(data_offset, data);
        self.store_ptr(header + ptr, data.len() as u64);
        self.fixups.push((offset, header));
        self.fixups.push((header, data_offset));
    }

    /// Keep `func` alive until the stack is reset.
    pub fn push_temp_arg(&mut self, func: PackedFunc) {
        self.temp_args.push(func);
    }

    /// Address of `offset` in linear memory. Only valid after [`commit`](Self::commit).
    pub fn ptr(&self, offset: usize) -> u64 {
        self.base_ptr + offset as u64
    }

    /// Flush `[0, upto)` into linear memory, growing the wasm region if needed.
    ///
    /// Bytes at and after `upto` are left untouched so return slots written
    /// by the module are not overwritten.
    pub fn commit(
        &mut self,
        mut ctx: impl AsContextMut,
        lib: &FfiLibrary,
        upto: usize,
    ) -> Result<()> {
        if self.wasm_capacity < self.buffer.len() {
            if self.base_ptr != 0 {
                lib.free_space(&mut ctx, self.base_ptr)?;
                self.base_ptr = 0;
                self.wasm_capacity = 0;
            }
            self.base_ptr = lib.alloc_space(&mut ctx, self.buffer.len() as u64)?;
            self.wasm_capacity = self.buffer.len();
        }

        for (target, value) in std::mem::take(&mut self.fixups) {
            let address = self.ptr(value);
            self.store_ptr(target, address);
        }

        let upto = upto.min(self.stack_top);
        lib.memory()
            .store_raw(&mut ctx, self.base_ptr, &self.buffer[..upto])
    }

    /// Rewind the stack and release its temporary arguments.
    pub fn reset(&mut self, mut ctx: impl AsContextMut<Data = BridgeState>) -> Result<()> {
        self.stack_top = 0;
        self.fixups.clear();
        let mut first_err = None;
        for mut func in self.temp_args.drain(..) {
            if let Err(e) = func.dispose(&mut ctx) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    #[cfg(test)]
    pub(crate) fn image(&self) -> &[u8] {
        &self.buffer[..self.stack_top]
    }

    /// Free the wasm region.
    pub fn dispose(&mut self, ctx: impl AsContextMut, lib: &FfiLibrary) -> Result<()> {
        if self.base_ptr != 0 {
            lib.free_space(ctx, self.base_ptr)?;
            self.base_ptr = 0;
            self.wasm_capacity = 0;
        }
        Ok(())
    }
}

/// Free list of reset call stacks.
#[derive(Debug, Default)]
pub struct CallStackPool {
    stacks: Vec<CallStack>,
}

impl CallStackPool {
    /// Take a stack from the pool, or create one.
    pub fn acquire(&mut self, width: PointerWidth, capacity: usize) -> CallStack {
        self.stacks
            .pop()
            .unwrap_or_else(|| CallStack::new(width, capacity))
    }

    /// Return a reset stack to the pool.
    pub fn release(&mut self, stack: CallStack) {
        self.stacks.push(stack);
    }

    /// Number of idle stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Whether the pool has no idle stacks.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Remove every idle stack.
    pub fn drain(&mut self) -> Vec<CallStack> {
        std::mem::take(&mut self.stacks)
    }
}

/// Run `f` with a pooled call stack, returning the stack afterwards.
///
/// Nested calls (host callbacks that call back into the module) take
/// their own stack, since the outer one is out of the pool for the
/// duration of `f`.
pub(crate) fn with_call_stack<C, R>(
    ctx: &mut C,
    f: impl FnOnce(&mut C, &FfiLibrary, &mut CallStack) -> Result<R>,
) -> Result<R>
where
    C: AsContextMut<Data = BridgeState>,
{
    let lib = library(&*ctx)?;
    let mut stack = ctx.as_context_mut().data_mut().acquire_call_stack(lib.width());
    let result = f(ctx, &lib, &mut stack);
    let reset = stack.reset(&mut *ctx);
    ctx.as_context_mut().data_mut().release_call_stack(stack);
    let value = result?;
    reset?;
    Ok(value)
}
