//! The packed status+size word stored at the head and tail of every block.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    struct StatusBits: u32 {
        const IN_USE = 0b1;
    }
}

/// The largest size representable in a `Tag`'s 31-bit size field.
pub const MAX_BLOCK_SIZE: usize = (1usize << 31) - 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Free,
    InUse,
}

/// A block header or footer word: one status bit plus a 31-bit size.
///
/// `Tag` values are duplicated verbatim between a block's header and its
/// footer; `check` relies on the two copies matching.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct Tag(u32);

impl Tag {
    pub(crate) fn new(size: usize, status: Status) -> Tag {
        debug_assert!(size <= MAX_BLOCK_SIZE, "block size exceeds the 31-bit tag field");
        let status_bits = match status {
            Status::Free => StatusBits::empty(),
            Status::InUse => StatusBits::IN_USE,
        };
        Tag(((size as u32) << 1) | status_bits.bits())
    }

    pub(crate) fn size(self) -> usize {
        (self.0 >> 1) as usize
    }

    pub(crate) fn status(self) -> Status {
        if StatusBits::from_bits_truncate(self.0) & StatusBits::IN_USE == StatusBits::IN_USE {
            Status::InUse
        } else {
            Status::Free
        }
    }

    pub(crate) fn is_free(self) -> bool {
        self.status() == Status::Free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_size_and_status() {
        let t = Tag::new(4096, Status::Free);
        assert_eq!(t.size(), 4096);
        assert_eq!(t.status(), Status::Free);

        let t = Tag::new(64, Status::InUse);
        assert_eq!(t.size(), 64);
        assert_eq!(t.status(), Status::InUse);
    }

    #[test]
    fn zero_size_is_representable() {
        let t = Tag::new(0, Status::InUse);
        assert_eq!(t.size(), 0);
        assert_eq!(t.status(), Status::InUse);
    }
}
