//! Full integrity walk over every bin: headers, footers, linkage, and the
//! `free_memory` accounting. Never mutates anything; safe to call at any
//! point between two public operations.

use core::ptr;

use crate::bins::{find_bin, NUM_BINS};
use crate::block::{footer_ptr, FREE_HEADER_SIZE};
use crate::context::Context;
use crate::error::{CorruptionKind, CorruptionReport};

/// Walks every bin's free list, checking each of the invariants from the
/// data model. Returns the first violation found, or `None` if the
/// structure is fully consistent.
pub fn check(ctx: &Context) -> Option<CorruptionReport> {
    let mut remaining = ctx.free_memory();

    for bin in 0..NUM_BINS {
        let dummy = ctx.bin_dummy(bin);
        unsafe {
            if !(*dummy).tag.is_free() || (*dummy).tag.size() != FREE_HEADER_SIZE {
                return Some(CorruptionReport {
                    kind: CorruptionKind::BadSentinel,
                    bin,
                    at: dummy as *const u8,
                });
            }

            let mut pred = dummy;
            let mut cur = (*dummy).next;

            while cur != dummy {
                if !(*cur).tag.is_free() {
                    return Some(CorruptionReport {
                        kind: CorruptionKind::NotFree,
                        bin,
                        at: cur as *const u8,
                    });
                }

                let size = (*cur).tag.size();
                let footer = footer_ptr(cur as *mut u8, size);
                if (*footer).tag.size() != size {
                    return Some(CorruptionReport {
                        kind: CorruptionKind::HeaderFooterMismatch,
                        bin,
                        at: cur as *const u8,
                    });
                }

                if find_bin(size) != Some(bin) {
                    return Some(CorruptionReport {
                        kind: CorruptionKind::WrongBin,
                        bin,
                        at: cur as *const u8,
                    });
                }

                if (*cur).prev != pred {
                    return Some(CorruptionReport {
                        kind: CorruptionKind::BrokenLink,
                        bin,
                        at: cur as *const u8,
                    });
                }

                remaining = match remaining.checked_sub(size) {
                    Some(r) => r,
                    None => {
                        return Some(CorruptionReport {
                            kind: CorruptionKind::FreeMemoryMismatch,
                            bin,
                            at: cur as *const u8,
                        })
                    }
                };

                pred = cur;
                cur = (*cur).next;
            }
        }
    }

    if remaining != 0 {
        log::error!("check: free_memory residual of {remaining} bytes after walking all bins");
        return Some(CorruptionReport {
            kind: CorruptionKind::FreeMemoryMismatch,
            bin: NUM_BINS,
            at: ctx as *const Context as *const u8,
        });
    }

    None
}

/// Like [`check`], but returns a raw pointer instead of a typed report, for
/// callers working against the literal C-shaped contract: null means no
/// corruption found, non-null is the address of the first offending
/// structure.
pub fn check_raw(ctx: &Context) -> *mut u8 {
    match check(ctx) {
        Some(report) => {
            log::error!("check_raw: {report}");
            report.at as *mut u8
        }
        None => ptr::null_mut(),
    }
}
