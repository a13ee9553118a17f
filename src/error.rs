//! Typed failure reasons for the allocator's two recoverable error paths:
//! a too-small `initialize` buffer, and a `check()` finding corruption.
//!
//! Everything else (double free, freeing a non-owned pointer, freeing the
//! context's own storage) is a programmer error and remains a fatal
//! assertion rather than a typed `Result`, per the crate's error-handling
//! policy: these are bugs in the caller, not conditions a caller can
//! meaningfully recover from at the call site.

/// Why [`crate::Context::initialize`] declined to set up a context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitError {
    /// The supplied buffer is too small to hold even the context record
    /// itself, let alone any usable free space.
    TooSmall,
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InitError::TooSmall => write!(f, "buffer too small to hold a context record"),
        }
    }
}

/// The kind of inconsistency `check()` found, identifying which invariant
/// from the data model was violated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CorruptionKind {
    /// A bin's sentinel head was not tagged `FREE`, or did not carry the
    /// dummy node's size.
    BadSentinel,
    /// A linked chunk's status was not `FREE`.
    NotFree,
    /// A linked chunk's header size did not match its footer size.
    HeaderFooterMismatch,
    /// A linked chunk did not belong to the bin `find_bin` says it should.
    WrongBin,
    /// A linked chunk's `prev` pointer did not match the traversal
    /// predecessor.
    BrokenLink,
    /// After walking every bin, the running free-byte total did not return
    /// to zero, meaning the context's `free_memory` counter has drifted
    /// from the sum of actually-free blocks.
    FreeMemoryMismatch,
}

/// A `check()` failure: which bin it was found in, at which chunk, and why.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CorruptionReport {
    pub kind: CorruptionKind,
    /// Index into the bin ladder the offending structure was found in.
    pub bin: usize,
    /// Address of the offending chunk (or bin sentinel), for diagnostics.
    pub at: *const u8,
}

impl core::fmt::Display for CorruptionReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "corruption ({:?}) in bin {} at {:p}",
            self.kind, self.bin, self.at
        )
    }
}
