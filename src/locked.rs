//! `GlobalAlloc`/`Allocator` integration: a `spin::Mutex`-guarded `Context`
//! handle, the same shape as the teacher crate's `CheckedHeap<Provider, N>`.
//!
//! This is an ergonomic convenience layered on top of the core engine, not
//! a relaxation of its single-threaded design: the mutex only serialises
//! whole-engine access, it does not give the core any finer-grained
//! concurrency of its own.

use core::alloc::{AllocError, Allocator, GlobalAlloc, Layout};
use core::ptr::NonNull;

use spin::Mutex;

use crate::context::ContextHandle;
use crate::ops;

/// A `Context` behind a spinlock, suitable for use as a `#[global_allocator]`
/// or as a backing store for `alloc`'s unstable `Allocator` trait.
pub struct LockedContext(Mutex<ContextHandle>);

impl LockedContext {
    /// # Safety
    ///
    /// `handle` must reference a `Context` that stays alive and is not
    /// accessed through any other handle for as long as this `LockedContext`
    /// is in use.
    pub const unsafe fn new(handle: ContextHandle) -> LockedContext {
        LockedContext(Mutex::new(handle))
    }

    fn with_context<R>(&self, f: impl FnOnce(&mut crate::context::Context) -> R) -> R {
        let handle = self.0.lock();
        let ctx = unsafe { handle.as_mut() };
        f(ctx)
    }
}

unsafe impl GlobalAlloc for LockedContext {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.with_context(|ctx| ops::allocate(ctx, layout.size()))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.with_context(|ctx| ops::free(ctx, ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        self.with_context(|ctx| ops::reallocate(ctx, ptr, new_size))
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.with_context(|ctx| ops::callocate(ctx, 1, layout.size()))
    }
}

unsafe impl Allocator for LockedContext {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let p = self.with_context(|ctx| ops::allocate(ctx, layout.size()));
        let p = NonNull::new(p).ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(p, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        self.with_context(|ctx| ops::free(ctx, ptr.as_ptr()));
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        _old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        let p = self.with_context(|ctx| ops::reallocate(ctx, ptr.as_ptr(), new_layout.size()));
        let p = NonNull::new(p).ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(p, new_layout.size()))
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        self.grow(ptr, old_layout, new_layout)
    }
}

// SAFETY: every access goes through `self.0`, a `spin::Mutex`, which
// serialises all calls into the single-threaded `Context` beneath it.
unsafe impl Send for LockedContext {}
unsafe impl Sync for LockedContext {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::alloc::{alloc, dealloc, Layout as StdLayout};

    #[test]
    fn global_alloc_round_trip() {
        let layout = StdLayout::from_size_align(64 * 1024, 16).unwrap();
        let raw = unsafe { alloc(layout) };
        let handle = unsafe { Context::initialize(raw, 64 * 1024).unwrap() };
        let locked = unsafe { LockedContext::new(handle) };

        let alloc_layout = Layout::from_size_align(128, 8).unwrap();
        let p = unsafe { GlobalAlloc::alloc(&locked, alloc_layout) };
        assert!(!p.is_null());
        unsafe {
            core::ptr::write_bytes(p, 0x42, 128);
            GlobalAlloc::dealloc(&locked, p, alloc_layout);
        }

        unsafe { dealloc(raw, layout) };
    }

    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn locked_context_is_send_and_sync() {
        assert_send_sync::<LockedContext>();
    }

    #[test]
    fn allocator_trait_round_trip() {
        let layout = StdLayout::from_size_align(64 * 1024, 16).unwrap();
        let raw = unsafe { alloc(layout) };
        let handle = unsafe { Context::initialize(raw, 64 * 1024).unwrap() };
        let locked = unsafe { LockedContext::new(handle) };

        let alloc_layout = Layout::from_size_align(64, 8).unwrap();
        let p = Allocator::allocate(&locked, alloc_layout).expect("allocation failed");
        unsafe { Allocator::deallocate(&locked, p.cast(), alloc_layout) };

        unsafe { dealloc(raw, layout) };
    }
}
