//! Tunable constants governing allocator policy. Kept as compile-time
//! constants rather than runtime configuration since there is no
//! filesystem or environment underneath this crate to read one from.

/// Requests at or below this size are eligible for the locality heuristic in
/// `ops::find_and_split`.
pub const MAX_SMALL_REQUEST: usize = 256;

/// Extra headroom requested from the external allocator on top of the
/// triggering allocation, to leave room for the two new sentinel blocks
/// `add_buffer` will install in the freshly grown region.
pub(crate) const EXTERNAL_ALLOC_HEADROOM_BLOCKS: usize = 2;
