//! The process-wide allocator state: bin table, free-byte counter, the
//! last-split locality hint, and the external-allocator callback.
//!
//! A `Context` is not a free-standing value a caller constructs and moves
//! around. It is placed *in-band* at the start of the first buffer handed to
//! [`Context::initialize`], because each of its 89 bins embeds a
//! self-referential sentinel `FreeHeader` (see [`crate::freelist`]) whose
//! `prev`/`next` point at its own address. Moving a `Context` after
//! initialization would leave every empty bin's sentinel pointing at stale
//! memory. Callers instead get back a [`ContextHandle`]: a raw pointer into
//! the buffer that owns the `Context`.

use core::ptr::{self, addr_of_mut, NonNull};

use crate::bins::{find_bin, NUM_BINS};
use crate::block::{
    chunk_from_footer, next_chunk, prev_footer, write_free, write_inuse, FreeHeader,
    MIN_FREE_CHUNK_SIZE, MIN_INUSE_CHUNK_SIZE,
};
use crate::consts::EXTERNAL_ALLOC_HEADROOM_BLOCKS;
use crate::error::InitError;
use crate::freelist;
use crate::tag::{Status, Tag};

/// A caller-supplied external allocator. Called with a minimum size; must
/// return the base address of a region of at least that size and fill in
/// the region's actual size, or return a null pointer on failure.
pub type ExternalAllocFn = fn(usize) -> (*mut u8, usize);

/// A single size-class free list: an always-present sentinel node that is
/// its own head when the bin is empty.
#[repr(C)]
pub(crate) struct Bin {
    dummy: FreeHeader,
}

/// The engine's full mutable state. Lives embedded inside a managed buffer;
/// see the module documentation for why it cannot be moved after
/// initialization.
#[repr(C)]
pub struct Context {
    bins: [Bin; NUM_BINS],
    free_memory: usize,
    last_chunk: *mut u8,
    last_chunk_size: usize,
    external_alloc: Option<ExternalAllocFn>,
}

/// A stable, `Copy`able reference to a [`Context`] living somewhere in
/// caller-owned memory. This is the unit of currency for `get_context` /
/// `set_context` and for the explicit multi-heap API.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ContextHandle(NonNull<Context>);

impl ContextHandle {
    /// # Safety
    ///
    /// `ptr` must point to a live, fully initialized `Context` that outlives
    /// every subsequent use of this handle.
    pub unsafe fn from_raw(ptr: *mut Context) -> Option<ContextHandle> {
        NonNull::new(ptr).map(ContextHandle)
    }

    pub fn as_ptr(self) -> *mut Context {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// The caller must not alias this reference with another live reference
    /// to the same `Context`, and the `Context` must still be alive.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn as_mut(self) -> &'static mut Context {
        &mut *self.0.as_ptr()
    }
}

impl Context {
    /// Places a fresh `Context` at the start of `buffer` and feeds the
    /// remainder of `buffer` to [`Context::add_buffer`] as the first managed
    /// region.
    ///
    /// # Safety
    ///
    /// `buffer` must point to `len` writable, properly-aligned bytes that
    /// outlive the returned handle and are not concurrently accessed
    /// through any other alias while the allocator is in use.
    pub unsafe fn initialize(buffer: *mut u8, len: usize) -> Result<ContextHandle, InitError> {
        let ctx_size = core::mem::size_of::<Context>();
        if len < ctx_size {
            log::error!("initialize: buffer of {len} bytes too small for context record ({ctx_size} bytes)");
            return Err(InitError::TooSmall);
        }

        let ctx_ptr = buffer as *mut Context;
        addr_of_mut!((*ctx_ptr).free_memory).write(0);
        addr_of_mut!((*ctx_ptr).last_chunk).write(ptr::null_mut());
        addr_of_mut!((*ctx_ptr).last_chunk_size).write(0);
        addr_of_mut!((*ctx_ptr).external_alloc).write(None);

        for i in 0..NUM_BINS {
            let bin_ptr = addr_of_mut!((*ctx_ptr).bins[i]);
            let dummy_ptr: *mut FreeHeader = addr_of_mut!((*bin_ptr).dummy);
            addr_of_mut!((*dummy_ptr).tag)
                .write(Tag::new(core::mem::size_of::<FreeHeader>(), Status::Free));
            addr_of_mut!((*dummy_ptr).prev).write(dummy_ptr);
            addr_of_mut!((*dummy_ptr).next).write(dummy_ptr);
        }

        log::debug!("context initialized at {ctx_ptr:p}, {len} bytes total");

        let handle = ContextHandle(NonNull::new_unchecked(ctx_ptr));
        let remainder = buffer.add(ctx_size);
        (*ctx_ptr).add_buffer(remainder, len - ctx_size);
        Ok(handle)
    }

    /// Returns the address of bin `idx`'s sentinel node. Takes `&self`
    /// rather than `&mut self`: producing the pointer borrows nothing, and
    /// both mutating call sites (splitting, freeing) and read-only ones
    /// (`check`) need it.
    pub(crate) fn bin_dummy(&self, idx: usize) -> *mut FreeHeader {
        &self.bins[idx].dummy as *const FreeHeader as *mut FreeHeader
    }

    pub fn free_memory(&self) -> usize {
        self.free_memory
    }

    pub(crate) fn add_free_memory(&mut self, n: usize) {
        self.free_memory += n;
    }

    pub(crate) fn sub_free_memory(&mut self, n: usize) {
        self.free_memory -= n;
    }

    pub(crate) fn last_chunk(&self) -> (*mut u8, usize) {
        (self.last_chunk, self.last_chunk_size)
    }

    pub(crate) fn set_last_chunk(&mut self, chunk: *mut u8, size: usize) {
        self.last_chunk = chunk;
        self.last_chunk_size = size;
    }

    /// Clears the locality hint. Called whenever the chunk it points at is
    /// consumed or coalesced away.
    pub(crate) fn clear_last_chunk(&mut self) {
        self.last_chunk = ptr::null_mut();
        self.last_chunk_size = 0;
    }

    /// Writes a free header/footer spanning `size` bytes at `region` and
    /// inserts it into the appropriate bin. Does not touch `free_memory`;
    /// callers that are publishing newly-freed memory (as opposed to
    /// re-publishing a split remainder) must update the counter themselves.
    pub(crate) fn add_free_chunk(&mut self, region: *mut u8, size: usize) {
        debug_assert!(size >= MIN_FREE_CHUNK_SIZE);
        let bin_idx = find_bin(size).expect("chunk size below smallest bin after size rounding");
        let dummy = self.bin_dummy(bin_idx);
        unsafe {
            let node = write_free(region, size, ptr::null_mut(), ptr::null_mut());
            freelist::insert_sorted(dummy, node);
        }
    }

    /// Installs `INUSE` sentinels at both ends of `region` and publishes its
    /// interior as one free chunk. Regions too small to hold two sentinels
    /// plus a minimum free chunk are silently ignored, per the buffer
    /// manager's contract.
    ///
    /// # Safety
    ///
    /// `region` must point to `len` writable, properly-aligned bytes owned
    /// exclusively by this context for the remainder of its lifetime.
    pub unsafe fn add_buffer(&mut self, region: *mut u8, len: usize) {
        let overhead = 2 * MIN_INUSE_CHUNK_SIZE;
        if len < overhead + MIN_FREE_CHUNK_SIZE {
            log::warn!("add_buffer: {len}-byte region too small, ignoring");
            return;
        }

        write_inuse(region, MIN_INUSE_CHUNK_SIZE);
        let tail = region.add(len - MIN_INUSE_CHUNK_SIZE);
        write_inuse(tail, MIN_INUSE_CHUNK_SIZE);

        let interior = region.add(MIN_INUSE_CHUNK_SIZE);
        let interior_size = len - overhead;
        self.add_free_chunk(interior, interior_size);
        self.add_free_memory(interior_size);

        log::debug!("add_buffer: registered {interior_size} free bytes at {interior:p}");
    }

    pub fn set_external_alloc(&mut self, f: Option<ExternalAllocFn>) {
        self.external_alloc = f;
    }

    /// Requests more memory from the registered external allocator and
    /// folds it into the pool. Returns whether growth happened, so the
    /// caller can retry the allocation that triggered it exactly once.
    pub(crate) fn out_of_memory(&mut self, need: usize) -> bool {
        let Some(f) = self.external_alloc else {
            log::warn!("out_of_memory: no external allocator registered, need {need} bytes");
            return false;
        };

        let request = need + EXTERNAL_ALLOC_HEADROOM_BLOCKS * MIN_INUSE_CHUNK_SIZE;
        log::debug!("out_of_memory: requesting {request} bytes from external allocator");
        let (ptr, actual_size) = f(request);
        if ptr.is_null() || actual_size < request {
            log::error!("out_of_memory: external allocator failed to satisfy {request}-byte request");
            return false;
        }

        unsafe { self.add_buffer(ptr, actual_size) };
        true
    }

    /// True if `[ptr, ptr + size)` overlaps this `Context`'s own storage.
    /// Used to reject frees that would clobber the allocator's own state.
    pub(crate) fn overlaps_self(&self, ptr: *mut u8, size: usize) -> bool {
        let self_start = self as *const Self as usize;
        let self_end = self_start + core::mem::size_of::<Self>();
        let block_start = ptr as usize;
        let block_end = block_start + size;
        block_start < self_end && block_end > self_start
    }
}

/// Recovers the footer of whatever block precedes `chunk`, returning both
/// the neighbour's start address and size when it is `FREE`.
pub(crate) unsafe fn free_prev_neighbour(chunk: *mut u8) -> Option<(*mut u8, usize)> {
    let footer = prev_footer(chunk);
    if (*footer).tag.is_free() {
        let start = chunk_from_footer(footer);
        Some((start, (*footer).tag.size()))
    } else {
        None
    }
}

/// Returns the block immediately following a `size`-byte block at `chunk`,
/// along with its size, when that neighbour is `FREE`.
pub(crate) unsafe fn free_next_neighbour(chunk: *mut u8, size: usize) -> Option<(*mut u8, usize)> {
    let next = next_chunk(chunk, size);
    let header = next as *const crate::block::InUseHeader;
    if (*header).tag.is_free() {
        Some((next, (*header).tag.size()))
    } else {
        None
    }
}

/// The free-list node at the start of a chunk known to be `FREE`.
pub(crate) unsafe fn free_header_at(chunk: *mut u8) -> *mut FreeHeader {
    chunk as *mut FreeHeader
}
