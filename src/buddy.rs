//! Block headers and buddy arithmetic.
//!
//! Every block in the pool, free or reserved, begins with a [`BlockHeader`].
//! A block of order `k` spans `2^k` bytes, header included, and is aligned to
//! `2^k` relative to the pool base. Two blocks of order `k` are buddies iff
//! their byte offsets from the base differ in exactly bit `k`, which is what
//! makes the buddy address a single XOR.

use std::mem;
use std::ptr;

/// Smallest order any block may have. `2^SMALLEST_ORDER` bytes must hold a
/// header plus at least one payload byte.
pub const SMALLEST_ORDER: usize = 6;

/// Smallest order a pool may be created with (1 MiB).
pub const MIN_ORDER: usize = 20;

/// Upper bound (exclusive) on the order a pool may be created with.
pub const MAX_ORDER: usize = 48;

/// Pool order used when the requested size is zero.
pub const DEFAULT_ORDER: usize = MIN_ORDER;

/// Size in bytes of the header stored at the start of every block.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Allocation state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockTag {
    /// A sentinel slot in the free-list table, never a real block.
    Unused,
    /// Free and linked into its order's list.
    Avail,
    /// Handed out to a caller; the link fields are meaningless.
    Reserved,
}

/// Intrusive header at the start of every block.
///
/// For `Avail` blocks `prev`/`next` form a circular doubly-linked list
/// through the sentinel of the block's order. The payload handed to callers
/// starts [`HEADER_SIZE`] bytes past the header.
#[repr(C)]
#[derive(Debug)]
pub struct BlockHeader {
    /// Allocation state.
    pub tag: BlockTag,
    /// Size class; the block spans `2^order` bytes.
    pub order: usize,
    /// Previous free block of the same order, or the sentinel.
    pub prev: *mut BlockHeader,
    /// Next free block of the same order, or the sentinel.
    pub next: *mut BlockHeader,
}

impl BlockHeader {
    /// Creates an unlinked sentinel header for the given order.
    pub(crate) const fn unused(order: usize) -> Self {
        Self {
            tag: BlockTag::Unused,
            order,
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }
}

/// Returns the smallest `k` such that `2^k >= bytes`.
///
/// `order_of(0)` is `0` by convention.
///
/// # Examples
///
/// ```
/// use buddy_pool::order_of;
///
/// assert_eq!(order_of(1), 0);
/// assert_eq!(order_of(1000), 10);
/// assert_eq!(order_of(1024), 10);
/// assert_eq!(order_of(2048), 11);
/// ```
#[inline]
#[must_use]
pub const fn order_of(bytes: usize) -> usize {
    if bytes <= 1 {
        return 0;
    }
    (usize::BITS - (bytes - 1).leading_zeros()) as usize
}

/// Returns the offset of the buddy of a block of the given order.
///
/// `offset` is the block's byte offset from the pool base. Buddies of order
/// `k` differ in exactly bit `k` of their offset, so the function is its own
/// inverse.
#[inline]
#[must_use]
pub const fn buddy_offset(offset: usize, order: usize) -> usize {
    offset ^ (1usize << order)
}
