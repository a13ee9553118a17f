//! In-band block layout: the narrowly-audited unsafe layer that turns a raw
//! buffer into a chain of header/footer-delimited chunks.
//!
//! Every function here takes a raw `*mut u8` pointing at the *start* of a
//! block (never the payload) and trusts the caller to have established that
//! the pointed-to bytes really are a block of at least the claimed size. The
//! rest of the crate is built entirely on top of this module so that the
//! unsafe surface stays small and auditable in one place.

use crate::tag::{Status, Tag};

/// Header written at the start of every block (free or in-use).
#[repr(C)]
pub(crate) struct InUseHeader {
    pub(crate) tag: Tag,
}

/// Footer written at the end of every block, duplicating the header's tag.
#[repr(C)]
pub(crate) struct Footer {
    pub(crate) tag: Tag,
}

/// Header written at the start of a `FREE` block. Carries the circular
/// doubly-linked list pointers used by the owning bin.
#[repr(C)]
pub(crate) struct FreeHeader {
    pub(crate) tag: Tag,
    pub(crate) prev: *mut FreeHeader,
    pub(crate) next: *mut FreeHeader,
}

pub(crate) const HEADER_SIZE: usize = core::mem::size_of::<InUseHeader>();
pub(crate) const FOOTER_SIZE: usize = core::mem::size_of::<Footer>();
pub(crate) const FREE_HEADER_SIZE: usize = core::mem::size_of::<FreeHeader>();

/// The smallest block that can ever be marked `INUSE`: just a header and a
/// footer, no payload.
pub const MIN_INUSE_CHUNK_SIZE: usize = HEADER_SIZE + FOOTER_SIZE;

/// The smallest block that can ever be marked `FREE`: large enough to hold
/// the free-list links as well as the footer. Every allocation is rounded up
/// to at least this size so that freeing it can always install a free
/// header in its place.
pub const MIN_FREE_CHUNK_SIZE: usize = FREE_HEADER_SIZE + FOOTER_SIZE;

static_assertions::const_assert!(MIN_FREE_CHUNK_SIZE >= MIN_INUSE_CHUNK_SIZE);

/// Writes an `INUSE` header and footer spanning `size` bytes starting at
/// `chunk`.
///
/// # Safety
///
/// `chunk` must point to at least `size` writable, properly-aligned bytes.
pub(crate) unsafe fn write_inuse(chunk: *mut u8, size: usize) {
    debug_assert!(size >= MIN_INUSE_CHUNK_SIZE);
    (chunk as *mut InUseHeader).write(InUseHeader {
        tag: Tag::new(size, Status::InUse),
    });
    footer_ptr(chunk, size).write(Footer {
        tag: Tag::new(size, Status::InUse),
    });
}

/// Writes a `FREE` header and footer spanning `size` bytes starting at
/// `chunk`, with the given (not yet linked-in) list pointers.
///
/// # Safety
///
/// `chunk` must point to at least `size` writable, properly-aligned bytes.
pub(crate) unsafe fn write_free(
    chunk: *mut u8,
    size: usize,
    prev: *mut FreeHeader,
    next: *mut FreeHeader,
) -> *mut FreeHeader {
    debug_assert!(size >= MIN_FREE_CHUNK_SIZE);
    let header = chunk as *mut FreeHeader;
    header.write(FreeHeader {
        tag: Tag::new(size, Status::Free),
        prev,
        next,
    });
    footer_ptr(chunk, size).write(Footer {
        tag: Tag::new(size, Status::Free),
    });
    header
}

/// The footer belonging to a block of `size` bytes starting at `chunk`.
///
/// # Safety
///
/// `chunk` must point to a block of at least `size` bytes.
pub(crate) unsafe fn footer_ptr(chunk: *mut u8, size: usize) -> *mut Footer {
    chunk.add(size - FOOTER_SIZE) as *mut Footer
}

/// The footer of whatever block immediately precedes `chunk` in memory.
///
/// Always safe to dereference as long as `chunk` is not the first byte of a
/// managed buffer: every managed buffer opens with an `INUSE` sentinel, so
/// there is always a real footer immediately before any other block.
///
/// # Safety
///
/// `chunk` must not be the start of a managed buffer.
pub(crate) unsafe fn prev_footer(chunk: *mut u8) -> *mut Footer {
    (chunk as *mut Footer).sub(1)
}

/// Recovers the start of the block described by `footer`.
///
/// # Safety
///
/// `footer` must be a valid footer, i.e. `(*footer).tag.size()` bytes before
/// it (inclusive of the footer itself) must be that block's header.
pub(crate) unsafe fn chunk_from_footer(footer: *mut Footer) -> *mut u8 {
    let size = (*footer).tag.size();
    (footer as *mut u8).add(FOOTER_SIZE).sub(size)
}

/// The block immediately following a `size`-byte block starting at `chunk`.
///
/// # Safety
///
/// `chunk` must start a block of exactly `size` bytes, and that block must
/// not be the last block of its managed buffer.
pub(crate) unsafe fn next_chunk(chunk: *mut u8, size: usize) -> *mut u8 {
    chunk.add(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc, dealloc, Layout};

    fn with_buffer(len: usize, f: impl FnOnce(*mut u8)) {
        let layout = Layout::from_size_align(len, core::mem::align_of::<FreeHeader>()).unwrap();
        let ptr = unsafe { alloc(layout) };
        assert!(!ptr.is_null());
        f(ptr);
        unsafe { dealloc(ptr, layout) };
    }

    #[test]
    fn inuse_round_trip() {
        with_buffer(64, |p| unsafe {
            write_inuse(p, 64);
            let header = &*(p as *const InUseHeader);
            assert_eq!(header.tag.size(), 64);
            assert_eq!(header.tag.status(), Status::InUse);
            let footer = &*footer_ptr(p, 64);
            assert_eq!(footer.tag, header.tag);
        });
    }

    #[test]
    fn free_round_trip_and_navigation() {
        with_buffer(128, |p| unsafe {
            let h = write_free(p, 128, core::ptr::null_mut(), core::ptr::null_mut());
            assert_eq!((*h).tag.size(), 128);
            assert!((*h).tag.is_free());

            let footer = footer_ptr(p, 128);
            assert_eq!((*footer).tag.size(), 128);

            let recovered = chunk_from_footer(footer);
            assert_eq!(recovered, p);
        });
    }

    #[test]
    fn prev_footer_and_next_chunk_are_adjacent() {
        with_buffer(256, |p| unsafe {
            write_inuse(p, 100);
            write_inuse(p.add(100), 156);

            let next = next_chunk(p, 100);
            assert_eq!(next, p.add(100));

            let prev = prev_footer(next);
            assert_eq!(prev, footer_ptr(p, 100));
        });
    }
}
