//! Circular intrusive free lists with sentinel headers.
//!
//! Each order in the pool has a sentinel [`BlockHeader`] whose `next`/`prev`
//! point back to itself when the list is empty. Because the sentinel is
//! always present, insertion and removal are O(1) with no empty/non-empty
//! branching. The sentinel is tagged [`BlockTag::Unused`] and its `order`
//! field is preset to its own index as a debugging aid; it is never handed
//! out as a block.

use std::ptr::NonNull;

use crate::buddy::{BlockHeader, BlockTag};

/// A lightweight handle over one order's free list, identified by its
/// sentinel header.
///
/// The handle does not own the sentinel: the pool's sentinel table does. All
/// link manipulation for the pool goes through this type so the raw-pointer
/// surgery stays in one place.
pub(crate) struct FreeList {
    sentinel: *mut BlockHeader,
}

impl FreeList {
    /// Wraps the sentinel of one order's list.
    ///
    /// # Safety
    ///
    /// `sentinel` must point to a header whose address is stable for as long
    /// as blocks are linked through it.
    pub unsafe fn new(sentinel: *mut BlockHeader) -> Self {
        Self { sentinel }
    }

    /// Resets the sentinel to an empty list for the given order.
    pub fn reset(&mut self, order: usize) {
        // SAFETY: the sentinel pointer is valid per the `new` contract.
        unsafe {
            (*self.sentinel).tag = BlockTag::Unused;
            (*self.sentinel).order = order;
            (*self.sentinel).next = self.sentinel;
            (*self.sentinel).prev = self.sentinel;
        }
    }

    /// Returns `true` if no free block is linked at this order.
    pub fn is_empty(&self) -> bool {
        // SAFETY: the sentinel pointer is valid per the `new` contract.
        unsafe { (*self.sentinel).next == self.sentinel }
    }

    /// Returns the first free block of this order, if any.
    pub fn first(&self) -> Option<NonNull<BlockHeader>> {
        if self.is_empty() {
            None
        } else {
            // SAFETY: the sentinel pointer is valid per the `new` contract.
            NonNull::new(unsafe { (*self.sentinel).next })
        }
    }

    /// Links `block` in at the head of the list.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid header that is not currently linked
    /// into any list.
    pub unsafe fn push_front(&mut self, block: NonNull<BlockHeader>) {
        let block = block.as_ptr();
        // SAFETY: sentinel and its neighbors are valid circular links.
        unsafe {
            (*block).next = (*self.sentinel).next;
            (*block).prev = self.sentinel;
            (*(*self.sentinel).next).prev = block;
            (*self.sentinel).next = block;
        }
    }

    /// Unlinks `block` from whichever list it is on.
    ///
    /// The circular links make this independent of the list handle.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid header currently linked into a list.
    pub unsafe fn unlink(block: NonNull<BlockHeader>) {
        let block = block.as_ptr();
        // SAFETY: a linked block has valid prev/next neighbors.
        unsafe {
            (*(*block).prev).next = (*block).next;
            (*(*block).next).prev = (*block).prev;
        }
    }

    /// Returns the number of blocks linked at this order.
    pub fn len(&self) -> usize {
        let mut count = 0;
        // SAFETY: the list is circular, so walking from the sentinel back to
        // the sentinel visits every linked block exactly once.
        unsafe {
            let mut cursor = (*self.sentinel).next;
            while cursor != self.sentinel {
                count += 1;
                cursor = (*cursor).next;
            }
        }
        count
    }
}
