//! The circular doubly-linked free list used by each bin.
//!
//! Every bin owns a dummy `FreeHeader` (see [`crate::context::Bin`]) that is
//! always present and always tagged `FREE`, satisfying the invariant that a
//! bin head is itself reachable from itself even when the bin holds no real
//! chunks. Real chunks are inserted between the dummy and its neighbors, so
//! the list is never truly empty: `is_empty` just checks whether the dummy's
//! `next` points back to itself.
//!
//! `intrusive_collections` (used for the equivalent structure in the
//! teacher's own heap allocator) is deliberately not used here: its list
//! types do not support a list head that is itself a live, self-referential
//! node of the same element type, which is exactly what this invariant
//! requires. See the crate's design notes for the full rationale.

use crate::block::FreeHeader;

/// True if `dummy` (a bin's sentinel node) has no real chunks linked in.
///
/// # Safety
///
/// `dummy` must point to a valid, initialized `FreeHeader`.
pub(crate) unsafe fn is_empty(dummy: *mut FreeHeader) -> bool {
    (*dummy).next == dummy
}

/// Removes `node` from whatever list it is currently linked into, repairing
/// its neighbors' pointers. Does not touch `node`'s own `prev`/`next`
/// fields; the caller is about to overwrite or discard them.
///
/// # Safety
///
/// `node` must be linked into a valid circular list (its `prev`/`next` must
/// point at live `FreeHeader`s, possibly `node` itself).
pub(crate) unsafe fn unlink(node: *mut FreeHeader) {
    let prev = (*node).prev;
    let next = (*node).next;
    (*prev).next = next;
    (*next).prev = prev;
}

/// Links `node` into the list immediately before `before`, i.e. between
/// `before`'s current `prev` and `before`.
///
/// # Safety
///
/// `before` must be linked into a valid circular list. `node` must not
/// already be linked into any list.
pub(crate) unsafe fn insert_before(before: *mut FreeHeader, node: *mut FreeHeader) {
    let prev = (*before).prev;
    (*node).prev = prev;
    (*node).next = before;
    (*prev).next = node;
    (*before).prev = node;
}

/// Walks the list starting just after `dummy`, returning the first node
/// whose tagged size is `>= need`, preferring smaller-or-equal matches first
/// since chunks are kept in non-decreasing size order (see
/// [`insert_sorted`]).
///
/// # Safety
///
/// `dummy` must point to a valid sentinel whose list contains only chunks
/// with a readable `tag`.
pub(crate) unsafe fn find_fit(dummy: *mut FreeHeader, need: usize) -> Option<*mut FreeHeader> {
    let mut cur = (*dummy).next;
    while cur != dummy {
        if (*cur).tag.size() >= need {
            return Some(cur);
        }
        cur = (*cur).next;
    }
    None
}

/// Inserts `node` into the list in non-decreasing size order, placed just
/// before the first existing chunk that is strictly larger than `node`. This
/// gives LRU ordering among chunks of equal size: a newly-freed chunk of a
/// given size is inserted after all existing chunks of that exact size, so
/// `find_fit` returns the longest-resident chunk first among ties.
///
/// # Safety
///
/// `dummy` must point to a valid sentinel. `node` must not already be linked
/// into any list and must have a readable `tag`.
pub(crate) unsafe fn insert_sorted(dummy: *mut FreeHeader, node: *mut FreeHeader) {
    let size = (*node).tag.size();
    let mut cur = (*dummy).next;
    while cur != dummy && (*cur).tag.size() <= size {
        cur = (*cur).next;
    }
    insert_before(cur, node);
}
