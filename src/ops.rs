//! The four public operations — `allocate`, `callocate`, `reallocate`,
//! `free` — plus the private splitting and coalescing helpers they share.
//!
//! These all take an explicit `&mut Context` rather than reaching for a
//! global; [`crate::lib`]'s free-function façade is a thin wrapper around
//! the current context that calls straight through to here.

use core::ptr;

use crate::bins::{find_bin, NUM_BINS};
use crate::block::{
    footer_ptr, write_inuse, InUseHeader, HEADER_SIZE, MIN_FREE_CHUNK_SIZE, MIN_INUSE_CHUNK_SIZE,
};
use crate::consts::MAX_SMALL_REQUEST;
use crate::context::{free_header_at, free_next_neighbour, free_prev_neighbour, Context};
use crate::freelist;
use crate::tag::MAX_BLOCK_SIZE;

/// Largest payload size `need_for` can turn into a tag-representable block
/// size without overflowing. Requests above this are rejected outright.
const MAX_REQUEST: usize = MAX_BLOCK_SIZE - MIN_INUSE_CHUNK_SIZE;

fn need_for(n: usize) -> usize {
    core::cmp::max(n + MIN_INUSE_CHUNK_SIZE, MIN_FREE_CHUNK_SIZE)
}

/// Allocates a block of at least `n` payload bytes, returning a pointer to
/// the payload or null on failure.
pub fn allocate(ctx: &mut Context, n: usize) -> *mut u8 {
    if n > MAX_REQUEST {
        log::warn!("allocate: {n}-byte request exceeds the largest representable block size");
        return ptr::null_mut();
    }
    let need = need_for(n);

    if let Some(p) = try_allocate(ctx, need) {
        return p;
    }
    if ctx.out_of_memory(need) {
        if let Some(p) = try_allocate(ctx, need) {
            return p;
        }
    }
    log::warn!("allocate: failed to satisfy {n}-byte request");
    ptr::null_mut()
}

fn try_allocate(ctx: &mut Context, need: usize) -> Option<*mut u8> {
    if need > ctx.free_memory() {
        return None;
    }
    unsafe { find_and_split(ctx, need) }
}

/// Allocates `count * elem_size` bytes and zero-fills them. Returns null on
/// overflow or on ordinary allocation failure.
pub fn callocate(ctx: &mut Context, count: usize, elem_size: usize) -> *mut u8 {
    let total = match count.checked_mul(elem_size) {
        Some(total) => total,
        None => return ptr::null_mut(),
    };
    let p = allocate(ctx, total);
    if !p.is_null() {
        unsafe { ptr::write_bytes(p, 0, total) };
    }
    p
}

/// Releases the block pointed to by `p`. A no-op if `p` is null.
pub fn free(ctx: &mut Context, p: *mut u8) {
    if p.is_null() {
        return;
    }

    unsafe {
        let mut chunk = p.sub(HEADER_SIZE);
        let mut size = {
            let header = chunk as *const InUseHeader;
            let tag = (*header).tag;
            assert!(!tag.is_free(), "double free at {p:p}");
            tag.size()
        };

        let footer = footer_ptr(chunk, size);
        assert_eq!(
            (*footer).tag.size(),
            size,
            "header/footer size mismatch freeing {p:p}"
        );
        assert!(
            !ctx.overlaps_self(chunk, size),
            "attempt to free the context's own storage at {p:p}"
        );

        ctx.add_free_memory(size);

        if let Some((prev_start, prev_size)) = free_prev_neighbour(chunk) {
            freelist::unlink(free_header_at(prev_start));
            if prev_start == ctx.last_chunk().0 {
                ctx.clear_last_chunk();
            }
            chunk = prev_start;
            size += prev_size;
        }

        if let Some((next_start, next_size)) = free_next_neighbour(chunk, size) {
            freelist::unlink(free_header_at(next_start));
            if next_start == ctx.last_chunk().0 {
                ctx.clear_last_chunk();
            }
            size += next_size;
        }

        ctx.add_free_chunk(chunk, size);
    }

    log::trace!("free: released block backing payload at {p:p}");
}

/// Resizes the block pointed to by `p` to hold `n` payload bytes, preserving
/// `min(old payload, n)` bytes of content. `p == null` behaves as
/// `allocate(ctx, n)`.
pub fn reallocate(ctx: &mut Context, p: *mut u8, n: usize) -> *mut u8 {
    if p.is_null() {
        return allocate(ctx, n);
    }
    if n > MAX_REQUEST {
        log::warn!("reallocate: {n}-byte request exceeds the largest representable block size");
        return ptr::null_mut();
    }

    unsafe {
        let chunk = p.sub(HEADER_SIZE);
        let cur = {
            let header = chunk as *const InUseHeader;
            (*header).tag.size()
        };
        let need = n + MIN_INUSE_CHUNK_SIZE;

        if need <= cur {
            let leftover = cur - need;
            if leftover < MIN_FREE_CHUNK_SIZE {
                return p;
            }
            write_inuse(chunk, need);
            let remainder = chunk.add(need);
            write_inuse(remainder, leftover);
            free(ctx, remainder.add(HEADER_SIZE));
            return p;
        }

        if let Some((next_start, next_size)) = free_next_neighbour(chunk, cur) {
            if next_size + cur >= need {
                freelist::unlink(free_header_at(next_start));
                if next_start == ctx.last_chunk().0 {
                    ctx.clear_last_chunk();
                }
                // `cur` bytes were never part of `free_memory` (they were
                // in use); pretend they were so `split_chunk`'s bookkeeping,
                // which assumes the whole incoming chunk was free, nets out
                // to "subtract only the newly-absorbed bytes".
                ctx.add_free_memory(cur);
                return split_chunk(ctx, chunk, cur + next_size, need);
            }
        }

        let new_ptr = allocate(ctx, n);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }
        let old_payload = cur - MIN_INUSE_CHUNK_SIZE;
        let copy_len = core::cmp::min(old_payload, n);
        ptr::copy_nonoverlapping(p, new_ptr, copy_len);
        free(ctx, p);
        new_ptr
    }
}

/// Locates a free chunk of at least `need` bytes, unlinks it, and splits it
/// down to `need` bytes (see [`split_chunk`]).
///
/// # Safety
///
/// `ctx` must describe a structurally valid set of bins.
unsafe fn find_and_split(ctx: &mut Context, need: usize) -> Option<*mut u8> {
    let start_bin = find_bin(need)?;

    let dummy = ctx.bin_dummy(start_bin);
    let mut chosen = freelist::find_fit(dummy, need);

    if chosen.is_none() {
        for bin in (start_bin + 1)..NUM_BINS {
            let dummy = ctx.bin_dummy(bin);
            if !freelist::is_empty(dummy) {
                chosen = Some((*dummy).next);
                break;
            }
        }
    }

    let mut node = chosen?;
    let size = (*node).tag.size();

    // Locality heuristic: a strictly-larger match loses to a pinned
    // last-split chunk for small requests, trading a slightly worse fit for
    // spatial locality with the previous small allocation.
    if size > need && need <= MAX_SMALL_REQUEST {
        let (last_ptr, last_size) = ctx.last_chunk();
        if !last_ptr.is_null() && need <= last_size {
            node = free_header_at(last_ptr);
        }
    }

    freelist::unlink(node);
    let chunk = node as *mut u8;
    let chunk_size = (*node).tag.size();
    Some(split_chunk(ctx, chunk, chunk_size, need))
}

/// Turns a `chunk_size`-byte free chunk at `chunk` into an in-use block of
/// exactly `need` bytes (or `chunk_size` bytes if the remainder would be too
/// small to be useful), publishing any leftover as a new free chunk.
///
/// # Safety
///
/// `chunk` must point to an unlinked free chunk of exactly `chunk_size`
/// bytes, and `need <= chunk_size`.
unsafe fn split_chunk(ctx: &mut Context, chunk: *mut u8, chunk_size: usize, need: usize) -> *mut u8 {
    debug_assert!(need <= chunk_size);

    if chunk == ctx.last_chunk().0 {
        ctx.clear_last_chunk();
    }

    let leftover = chunk_size - need;
    let final_size = if leftover < MIN_FREE_CHUNK_SIZE {
        chunk_size
    } else {
        need
    };

    write_inuse(chunk, final_size);
    ctx.sub_free_memory(final_size);

    if final_size < chunk_size {
        let remainder = chunk.add(final_size);
        let remainder_size = chunk_size - final_size;
        ctx.add_free_chunk(remainder, remainder_size);
        ctx.set_last_chunk(remainder, remainder_size);
    }

    chunk.add(HEADER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::alloc::{alloc, dealloc, Layout};

    struct Fixture {
        layout: Layout,
        raw: *mut u8,
        ctx: *mut Context,
    }

    impl Fixture {
        fn new(len: usize) -> Fixture {
            let layout = Layout::from_size_align(len, 16).unwrap();
            let raw = unsafe { alloc(layout) };
            assert!(!raw.is_null());
            let handle = unsafe { Context::initialize(raw, len).expect("buffer too small") };
            Fixture {
                layout,
                raw,
                ctx: handle.as_ptr(),
            }
        }

        fn ctx(&mut self) -> &mut Context {
            unsafe { &mut *self.ctx }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            unsafe { dealloc(self.raw, self.layout) };
        }
    }

    #[test]
    fn allocate_then_free_returns_to_initial_free_memory() {
        let mut fx = Fixture::new(64 * 1024);
        let initial = fx.ctx().free_memory();

        let p = allocate(fx.ctx(), 128);
        assert!(!p.is_null());
        assert!(fx.ctx().free_memory() < initial);

        free(fx.ctx(), p);
        assert_eq!(fx.ctx().free_memory(), initial);
    }

    #[test]
    fn callocate_zeroes_payload() {
        let mut fx = Fixture::new(64 * 1024);
        let p = callocate(fx.ctx(), 16, 8);
        assert!(!p.is_null());
        let bytes = unsafe { core::slice::from_raw_parts(p, 128) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn allocate_rejects_oversized_request_without_touching_state() {
        let mut fx = Fixture::new(64 * 1024);
        let initial = fx.ctx().free_memory();

        assert!(allocate(fx.ctx(), MAX_REQUEST + 1).is_null());
        assert!(allocate(fx.ctx(), usize::MAX).is_null());
        assert_eq!(fx.ctx().free_memory(), initial);
    }

    #[test]
    fn callocate_rejects_overflowing_product_without_zero_filling() {
        // A naive `n + MIN_INUSE_CHUNK_SIZE` would overflow here; `callocate`
        // must reject the request via `allocate`'s size guard before ever
        // reaching a `write_bytes` call sized by the product.
        let mut fx = Fixture::new(64 * 1024);
        assert!(callocate(fx.ctx(), 1, usize::MAX).is_null());
        assert!(callocate(fx.ctx(), usize::MAX, 2).is_null());
    }

    #[test]
    fn reallocate_rejects_oversized_request() {
        let mut fx = Fixture::new(64 * 1024);
        let p = allocate(fx.ctx(), 32);
        assert!(!p.is_null());
        assert!(reallocate(fx.ctx(), p, usize::MAX).is_null());
    }

    #[test]
    fn reallocate_preserves_payload_prefix_when_growing() {
        let mut fx = Fixture::new(64 * 1024);
        let p = allocate(fx.ctx(), 32);
        unsafe { ptr::write_bytes(p, 0xAB, 32) };

        let grown = reallocate(fx.ctx(), p, 256);
        assert!(!grown.is_null());
        let bytes = unsafe { core::slice::from_raw_parts(grown, 32) };
        assert!(bytes.iter().all(|&b| b == 0xAB));
    }

    /// Builds a context whose single managed buffer has an interior of
    /// exactly `interior_len` bytes, so the free chunk left behind after one
    /// allocation has an exact, predictable size — needed to hit the grow
    /// boundary precisely rather than relying on incidental leftover space.
    fn fixture_with_exact_interior(interior_len: usize) -> Fixture {
        let ctx_size = core::mem::size_of::<Context>();
        let overhead = 2 * MIN_INUSE_CHUNK_SIZE;
        Fixture::new(ctx_size + overhead + interior_len)
    }

    #[test]
    fn reallocate_grow_in_place_boundary_is_inclusive() {
        // Regression for the corrected `next.size + cur >= need` direction:
        // a free neighbour exactly large enough must be absorbed in place.
        //
        // a's in-use block is need_for(64) = 64 + MIN_INUSE_CHUNK_SIZE bytes;
        // reallocating to 128 bytes needs 128 + MIN_INUSE_CHUNK_SIZE bytes
        // total, i.e. exactly 64 more than `a_block`. Sizing the trailing
        // free neighbour to exactly that leaves `next.size + cur == need`.
        let a_block = 64 + MIN_INUSE_CHUNK_SIZE;
        let next_block = 64;
        let mut fx = fixture_with_exact_interior(a_block + next_block);

        let a = allocate(fx.ctx(), 64);
        assert!(!a.is_null());

        let grown = reallocate(fx.ctx(), a, 128);
        assert_eq!(grown, a, "exact-fit neighbour should grow in place");
    }

    #[test]
    fn reallocate_falls_back_to_copy_when_neighbour_one_byte_short() {
        let a_block = 64 + MIN_INUSE_CHUNK_SIZE;
        let next_block = 63;
        let mut fx = fixture_with_exact_interior(a_block + next_block);

        // A too-tight next neighbour must fall through to the copy path,
        // which needs somewhere else to copy into: register a second,
        // generously-sized buffer alongside the tight one.
        let spare_layout = Layout::from_size_align(4096, 16).unwrap();
        let spare = unsafe { alloc(spare_layout) };
        assert!(!spare.is_null());
        unsafe { fx.ctx().add_buffer(spare, 4096) };

        let a = allocate(fx.ctx(), 64);
        assert!(!a.is_null());

        let grown = reallocate(fx.ctx(), a, 128);
        assert!(!grown.is_null(), "copy path should still succeed");
        assert_ne!(
            grown, a,
            "a too-small neighbour must not be absorbed in place"
        );

        unsafe { dealloc(spare, spare_layout) };
    }

    #[test]
    fn double_free_panics() {
        let mut fx = Fixture::new(64 * 1024);
        let p = allocate(fx.ctx(), 16);
        free(fx.ctx(), p);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            free(fx.ctx(), p);
        }));
        assert!(result.is_err());
    }
}
