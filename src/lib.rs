//! A boundary-tag, segregated free-list allocator over caller-supplied
//! memory buffers.
//!
//! Callers hand the engine raw byte buffers via [`initialize`] and
//! [`add_buffer`]; it services `allocate`/`free`/`reallocate`/`callocate`
//! out of them with O(log n) bin lookup and eager coalescing. There is no
//! hidden global heap: every managed byte comes from a buffer the caller
//! owns, which is what makes this usable on embedded targets, inside
//! sandboxes, or as a second, checkpointable heap alongside the host's own.
//!
//! The explicit [`Context`]/[`ContextHandle`] API supports multiple
//! independent heaps. The free functions at the crate root (`initialize`,
//! `allocate`, `free`, ...) are a legacy single-global-heap convenience on
//! top of that, tracking one "current" context via [`get_context`] /
//! [`set_context`].

#![no_std]
#![feature(allocator_api)]

mod bins;
mod block;
pub mod check;
pub mod consts;
pub mod context;
pub mod error;
mod freelist;
pub mod locked;
pub mod ops;
mod tag;

pub use context::{Context, ContextHandle, ExternalAllocFn};
pub use error::{CorruptionKind, CorruptionReport, InitError};
pub use locked::LockedContext;

use core::ptr;

static mut CURRENT_CONTEXT: Option<ContextHandle> = None;

/// # Safety
///
/// Must not be called concurrently with any other function in this crate
/// that touches `CURRENT_CONTEXT` (the core is single-threaded; see
/// `LockedContext` for a synchronised alternative).
unsafe fn current_context_mut() -> &'static mut Context {
    CURRENT_CONTEXT
        .expect("no current context: call initialize() or set_context() first")
        .as_mut()
}

/// Places a fresh context at the start of `buffer` and makes it current.
///
/// # Safety
///
/// `buffer` must point to `len` writable, properly-aligned bytes that
/// outlive the context and are not aliased elsewhere.
pub unsafe fn initialize(buffer: *mut u8, len: usize) -> Result<(), InitError> {
    let handle = Context::initialize(buffer, len)?;
    CURRENT_CONTEXT = Some(handle);
    Ok(())
}

/// Folds another buffer into the current context's pool.
///
/// # Safety
///
/// `region` must point to `len` writable, properly-aligned bytes, owned
/// exclusively by the current context from here on. A context must already
/// be current (see [`initialize`] / [`set_context`]).
pub unsafe fn add_buffer(region: *mut u8, len: usize) {
    current_context_mut().add_buffer(region, len);
}

/// Returns the address of the current context record, or null if none is
/// set. Intended to be stashed away and later restored via [`set_context`].
pub fn get_context() -> *mut Context {
    unsafe { CURRENT_CONTEXT.map(ContextHandle::as_ptr).unwrap_or(ptr::null_mut()) }
}

/// Makes `ctx` the current context, for multi-heap or checkpoint/restore
/// use. Passing null clears the current context.
///
/// # Safety
///
/// `ctx`, if non-null, must point to a `Context` previously produced by
/// [`Context::initialize`] (directly or via [`initialize`]) that is still
/// alive.
pub unsafe fn set_context(ctx: *mut Context) {
    CURRENT_CONTEXT = ContextHandle::from_raw(ctx);
}

/// Registers (or clears, with `None`) the callback used to grow the pool
/// when the current context runs out of memory.
///
/// # Safety
///
/// A context must already be current.
pub unsafe fn set_external_alloc(f: Option<ExternalAllocFn>) {
    current_context_mut().set_external_alloc(f);
}

/// Allocates `n` bytes from the current context. See [`ops::allocate`].
///
/// # Safety
///
/// A context must already be current.
pub unsafe fn allocate(n: usize) -> *mut u8 {
    ops::allocate(current_context_mut(), n)
}

/// Allocates and zero-fills `count * elem_size` bytes from the current
/// context. See [`ops::callocate`].
///
/// # Safety
///
/// A context must already be current.
pub unsafe fn callocate(count: usize, elem_size: usize) -> *mut u8 {
    ops::callocate(current_context_mut(), count, elem_size)
}

/// Resizes a block previously obtained from the current context. See
/// [`ops::reallocate`].
///
/// # Safety
///
/// A context must already be current, and `p` must be null or a pointer
/// previously returned by this context and not yet freed.
pub unsafe fn reallocate(p: *mut u8, n: usize) -> *mut u8 {
    ops::reallocate(current_context_mut(), p, n)
}

/// Releases a block previously obtained from the current context. See
/// [`ops::free`].
///
/// # Safety
///
/// A context must already be current, and `p` must be null or a pointer
/// previously returned by this context and not yet freed.
pub unsafe fn free(p: *mut u8) {
    ops::free(current_context_mut(), p);
}

/// Runs the integrity checker over the current context. See [`check::check`].
///
/// # Safety
///
/// A context must already be current.
pub unsafe fn check() -> Option<CorruptionReport> {
    check::check(current_context_mut())
}
