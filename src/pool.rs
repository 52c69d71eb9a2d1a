//! Pool lifecycle and the allocate/release engine.
//!
//! This module provides the [`BuddyPool`] and [`BuddyPoolBuilder`] types. A
//! pool owns one contiguous backing region of `2^max_order` bytes and a table
//! of free-list sentinels, one per order. Allocation takes the first
//! sufficient free block and splits it down to the requested order; release
//! merges the freed block with its buddy for as long as the buddy is free.

use std::fmt;
use std::io::{Error, ErrorKind, Result};
use std::ptr::NonNull;

use crate::buddy::{
    BlockHeader, BlockTag, DEFAULT_ORDER, HEADER_SIZE, MAX_ORDER, MIN_ORDER, SMALLEST_ORDER,
    buddy_offset, order_of,
};
use crate::free_list::FreeList;
use crate::provider::{MemoryProvider, MmapProvider};

/// Builder for creating a [`BuddyPool`] with custom configuration.
///
/// # Example
///
/// ```rust
/// use buddy_pool::BuddyPoolBuilder;
///
/// let pool = BuddyPoolBuilder::new()
///     .size(1024 * 1024) // 1 MiB
///     .build();
/// ```
pub struct BuddyPoolBuilder {
    size: usize,
    provider: Box<dyn MemoryProvider>,
}

impl Default for BuddyPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyPoolBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Default settings:
    /// - Size: `2^DEFAULT_ORDER` bytes (1 MiB)
    /// - Provider: [`MmapProvider`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            size: 0,
            provider: Box::new(MmapProvider::new()),
        }
    }

    /// Sets the requested pool size in bytes.
    ///
    /// The pool is sized to the smallest power of two covering `size`,
    /// clamped into `[MIN_ORDER, MAX_ORDER)`. Zero selects the default
    /// order.
    #[must_use]
    pub const fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Sets a custom backing-memory provider.
    #[must_use]
    pub fn provider(mut self, provider: Box<dyn MemoryProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Builds the pool, mapping its backing region.
    ///
    /// A provider that cannot supply the region signals resource exhaustion
    /// the allocator cannot recover from; the process is aborted.
    #[must_use]
    pub fn build(self) -> BuddyPool {
        let max_order = clamp_pool_order(self.size);
        let size_bytes = 1usize << max_order;

        let base = match self.provider.map(size_bytes) {
            Ok(base) => base,
            Err(err) => {
                log::error!("backing mapping of {size_bytes} bytes failed: {err}");
                std::process::abort();
            }
        };

        // The sentinel table is boxed so its addresses stay stable when the
        // pool value moves; the circular links point into it.
        let mut avail: Box<[BlockHeader]> =
            (0..=max_order).map(BlockHeader::unused).collect();
        for order in 0..=max_order {
            // SAFETY: the boxed slice outlives every link made through it.
            unsafe { FreeList::new(&raw mut avail[order]) }.reset(order);
        }

        let mut pool = BuddyPool {
            base,
            size_bytes,
            max_order,
            avail,
            provider: self.provider,
        };

        // Install the initial block: the whole region, free, at the top
        // order.
        let block = pool.base.as_ptr().cast::<BlockHeader>();
        // SAFETY: the mapping spans size_bytes >= HEADER_SIZE zeroed bytes.
        unsafe {
            (*block).tag = BlockTag::Avail;
            (*block).order = max_order;
            pool.list(max_order).push_front(NonNull::new(block).unwrap());
        }

        pool
    }
}

/// Chooses the pool order for a requested byte size.
fn clamp_pool_order(size: usize) -> usize {
    let order = if size == 0 {
        DEFAULT_ORDER
    } else {
        order_of(size)
    };
    order.clamp(MIN_ORDER, MAX_ORDER - 1)
}

/// A fixed-capacity memory pool using buddy allocation.
///
/// The pool owns a single `2^max_order`-byte backing region for its entire
/// lifetime. Every block handed out carries an intrusive header, so the
/// usable payload of a block of order `k` is `2^k - HEADER_SIZE` bytes.
///
/// # Thread Safety
///
/// A pool is single-threaded by design: it contains raw pointers and is
/// neither `Send` nor `Sync`. Wrap it in external mutual exclusion if it must
/// be shared.
///
/// # Example
///
/// ```rust
/// use buddy_pool::BuddyPool;
///
/// # fn main() -> std::io::Result<()> {
/// let mut pool = BuddyPool::new(1024 * 1024);
///
/// let ptr = pool.allocate(4096)?;
/// unsafe {
///     ptr.as_ptr().write(42);
///     assert_eq!(*ptr.as_ptr(), 42);
///     pool.release(ptr.as_ptr());
/// }
/// # Ok(())
/// # }
/// ```
pub struct BuddyPool {
    /// Base address of the backing region.
    base: NonNull<u8>,

    /// Size of the backing region; always `2^max_order`.
    size_bytes: usize,

    /// Order of the whole region.
    max_order: usize,

    /// Free-list sentinels, indexed by order `0..=max_order`.
    avail: Box<[BlockHeader]>,

    /// Provider that mapped the region and reclaims it on drop.
    provider: Box<dyn MemoryProvider>,
}

impl BuddyPool {
    /// Creates a pool sized to the smallest order covering `size` bytes.
    ///
    /// `size == 0` selects the default order. The chosen order is clamped
    /// into `[MIN_ORDER, MAX_ORDER)`. Uses the default [`MmapProvider`].
    #[must_use]
    pub fn new(size: usize) -> Self {
        BuddyPoolBuilder::new().size(size).build()
    }

    /// Returns the pool capacity in bytes, header overhead included.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.size_bytes
    }

    /// Returns the order of the whole region.
    #[must_use]
    pub const fn max_order(&self) -> usize {
        self.max_order
    }

    /// Returns the number of free blocks at each order `0..=max_order`.
    #[must_use]
    pub fn free_counts(&self) -> Vec<usize> {
        (0..=self.max_order)
            .map(|order| self.list_ref(order).len())
            .collect()
    }

    /// Allocates a block with at least `size` usable bytes.
    ///
    /// The block actually reserved is the smallest power of two covering
    /// `size` plus the header, and never smaller than `2^SMALLEST_ORDER`
    /// bytes. The returned pointer is to the payload, immediately past the
    /// header.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `size` is 0; the pool is not touched.
    /// - `OutOfMemory` if the required order exceeds the pool's maximum
    ///   order or no free block of a sufficient order exists.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "size must be > 0"));
        }
        let total = size
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "size overflows"))?;
        let order = order_of(total).max(SMALLEST_ORDER);
        if order > self.max_order {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                "request exceeds pool capacity",
            ));
        }

        // Find the first non-empty list at or above the target order.
        let mut found = None;
        for search_order in order..=self.max_order {
            if let Some(block) = self.list(search_order).first() {
                found = Some(block);
                break;
            }
        }
        let Some(block) = found else {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                "no free block large enough",
            ));
        };

        // SAFETY: block came from a free list, so it is a valid Avail header
        // inside the region.
        unsafe {
            FreeList::unlink(block);

            // Split until the block is right-sized, pushing each carved
            // upper half onto its order's list.
            let block = block.as_ptr();
            while (*block).order > order {
                let half_order = (*block).order - 1;
                (*block).order = half_order;
                let half = 1usize << half_order;
                let buddy = block.cast::<u8>().add(half).cast::<BlockHeader>();
                (*buddy).tag = BlockTag::Avail;
                (*buddy).order = half_order;
                self.list(half_order)
                    .push_front(NonNull::new(buddy).unwrap());
                log::trace!(
                    "split block at offset {} down to order {half_order}",
                    self.offset_of(block)
                );
            }

            (*block).tag = BlockTag::Reserved;
            log::trace!(
                "allocated order-{order} block at offset {}",
                self.offset_of(block)
            );
            Ok(NonNull::new(block.cast::<u8>().add(HEADER_SIZE)).unwrap())
        }
    }

    /// Returns a previously allocated block to the pool, merging it with its
    /// buddy for as long as the buddy is also free.
    ///
    /// Null pointers, pointers outside the pool, and blocks that are not
    /// currently reserved (double frees included) are absorbed as no-ops;
    /// the latter are reported through `log::warn!` so misuse is observable
    /// without changing behavior.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from
    /// [`allocate`](Self::allocate) on this pool.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if !self.contains_payload(ptr) {
            log::warn!("ignoring release of foreign pointer {ptr:p}");
            return;
        }

        // SAFETY: a payload pointer from allocate sits HEADER_SIZE bytes
        // past its header, inside the region.
        unsafe {
            let mut block = ptr.sub(HEADER_SIZE).cast::<BlockHeader>();
            if (*block).tag != BlockTag::Reserved {
                log::warn!(
                    "ignoring release of non-reserved block at offset {}",
                    self.offset_of(block)
                );
                return;
            }

            (*block).tag = BlockTag::Avail;
            let mut order = (*block).order;

            while order < self.max_order {
                let offset = self.offset_of(block);
                let buddy_off = buddy_offset(offset, order);
                if buddy_off >= self.size_bytes {
                    break;
                }
                let buddy = self.base.as_ptr().add(buddy_off).cast::<BlockHeader>();
                if (*buddy).tag != BlockTag::Avail || (*buddy).order != order {
                    break;
                }

                FreeList::unlink(NonNull::new(buddy).unwrap());
                log::trace!("merging buddies at offsets {offset} and {buddy_off}");

                // The lower-addressed member survives as the merged block.
                if buddy < block {
                    block = buddy;
                }
                order += 1;
                (*block).order = order;
            }

            self.list(order).push_front(NonNull::new(block).unwrap());
            log::trace!(
                "released block at offset {} at order {order}",
                self.offset_of(block)
            );
        }
    }

    /// Resizes a previously allocated block.
    ///
    /// Declared for contract clarity but intentionally unsupported in this
    /// version; callers must not rely on it.
    ///
    /// # Errors
    ///
    /// Always returns `Unsupported`.
    pub fn resize(&mut self, _ptr: *mut u8, _new_size: usize) -> Result<NonNull<u8>> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "resize is not implemented",
        ))
    }

    /// Returns a mutable free-list handle for one order.
    fn list(&mut self, order: usize) -> FreeList {
        // SAFETY: the boxed sentinel table lives as long as self.
        unsafe { FreeList::new(&raw mut self.avail[order]) }
    }

    /// Returns a read-only free-list handle for one order.
    fn list_ref(&self, order: usize) -> FreeList {
        // The handle is only used for reads here.
        unsafe { FreeList::new((&raw const self.avail[order]).cast_mut()) }
    }

    /// Byte offset of a header from the pool base.
    fn offset_of(&self, block: *const BlockHeader) -> usize {
        block as usize - self.base.as_ptr() as usize
    }

    /// Returns `true` if `ptr` could be a payload pointer into this pool.
    fn contains_payload(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base + HEADER_SIZE && addr < base + self.size_bytes
    }
}

impl Default for BuddyPool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Drop for BuddyPool {
    fn drop(&mut self) {
        // SAFETY: base/size_bytes describe the mapping obtained in build
        // and the region is unmapped exactly once, here.
        if let Err(err) = unsafe { self.provider.unmap(self.base, self.size_bytes) } {
            // A mapping that cannot be released means the bookkeeping is
            // corrupt; continuing would operate on a broken pool.
            log::error!("failed to release backing mapping: {err}");
            std::process::abort();
        }
    }
}

impl fmt::Debug for BuddyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyPool")
            .field("base", &self.base)
            .field("capacity", &self.size_bytes)
            .field("max_order", &self.max_order)
            .field("free_counts", &self.free_counts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_pool_counts(pool: &BuddyPool) -> bool {
        let counts = pool.free_counts();
        counts[pool.max_order()] == 1
            && counts[..pool.max_order()].iter().all(|&count| count == 0)
    }

    #[test]
    fn test_clamp_pool_order() {
        assert_eq!(clamp_pool_order(0), DEFAULT_ORDER);
        assert_eq!(clamp_pool_order(1), MIN_ORDER);
        assert_eq!(clamp_pool_order(1 << MIN_ORDER), MIN_ORDER);
        assert_eq!(clamp_pool_order((1 << MIN_ORDER) + 1), MIN_ORDER + 1);
        assert_eq!(clamp_pool_order(usize::MAX), MAX_ORDER - 1);
    }

    #[test]
    fn test_init_full_pool() {
        let pool = BuddyPool::new(1 << MIN_ORDER);
        assert_eq!(pool.max_order(), MIN_ORDER);
        assert_eq!(pool.capacity(), 1 << MIN_ORDER);
        assert!(full_pool_counts(&pool));

        // The single free block is the base of the region at the top order.
        let first = pool.list_ref(MIN_ORDER).first().unwrap();
        assert_eq!(first.as_ptr().cast::<u8>(), pool.base.as_ptr());
        unsafe {
            assert_eq!((*first.as_ptr()).tag, BlockTag::Avail);
            assert_eq!((*first.as_ptr()).order, MIN_ORDER);
        }

        // Sentinels below the top order are empty and tagged Unused with
        // their own index as order.
        for order in 0..MIN_ORDER {
            assert!(pool.list_ref(order).is_empty());
            assert_eq!(pool.avail[order].tag, BlockTag::Unused);
            assert_eq!(pool.avail[order].order, order);
        }
    }

    #[test]
    fn test_split_produces_buddies_at_expected_offsets() {
        let mut pool = BuddyPool::new(1 << MIN_ORDER);
        let ptr = pool.allocate(1).unwrap();

        // The smallest block is carved from the base, so the payload starts
        // right past the header at the base.
        assert_eq!(
            ptr.as_ptr(),
            unsafe { pool.base.as_ptr().add(HEADER_SIZE) }
        );

        // Each split leaves one free buddy at offset 2^k per order from
        // SMALLEST_ORDER up to max_order - 1.
        for order in SMALLEST_ORDER..MIN_ORDER {
            let block = pool.list_ref(order).first().unwrap();
            assert_eq!(pool.offset_of(block.as_ptr()), 1 << order);
            unsafe {
                assert_eq!((*block.as_ptr()).order, order);
                assert_eq!((*block.as_ptr()).tag, BlockTag::Avail);
            }
        }
        assert!(pool.list_ref(MIN_ORDER).is_empty());

        unsafe { pool.release(ptr.as_ptr()) };
        assert!(full_pool_counts(&pool));
    }

    #[test]
    fn test_split_buddy_pair_is_symmetric() {
        let mut pool = BuddyPool::new(1 << MIN_ORDER);
        let ptr = pool.allocate(1).unwrap();

        // The reserved block at the base and the free block at 2^k are a
        // buddy pair of the same order right after the split.
        let reserved = unsafe { ptr.as_ptr().sub(HEADER_SIZE) }.cast::<BlockHeader>();
        let free = pool.list_ref(SMALLEST_ORDER).first().unwrap().as_ptr();
        let reserved_off = pool.offset_of(reserved);
        let free_off = pool.offset_of(free);
        assert_eq!(buddy_offset(reserved_off, SMALLEST_ORDER), free_off);
        assert_eq!(buddy_offset(free_off, SMALLEST_ORDER), reserved_off);
        unsafe {
            assert_eq!((*reserved).order, (*free).order);
        }

        unsafe { pool.release(ptr.as_ptr()) };
    }

    #[test]
    fn test_release_merges_back_to_full_pool() {
        let mut pool = BuddyPool::new(1 << MIN_ORDER);

        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(1).unwrap();
        assert!(!full_pool_counts(&pool));

        // Freed in reverse order of allocation.
        unsafe {
            pool.release(b.as_ptr());
            pool.release(a.as_ptr());
        }
        assert!(full_pool_counts(&pool));
    }

    #[test]
    fn test_release_restores_block_at_base() {
        let mut pool = BuddyPool::new(1 << MIN_ORDER);
        let ptr = pool.allocate(4096).unwrap();
        unsafe { pool.release(ptr.as_ptr()) };

        let first = pool.list_ref(pool.max_order()).first().unwrap();
        assert_eq!(first.as_ptr().cast::<u8>(), pool.base.as_ptr());
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut pool = BuddyPool::new(1 << MIN_ORDER);
        let ptr = pool.allocate(100).unwrap();

        unsafe {
            pool.release(ptr.as_ptr());
            let counts = pool.free_counts();
            pool.release(ptr.as_ptr());
            assert_eq!(pool.free_counts(), counts);
        }
        assert!(full_pool_counts(&pool));
    }

    #[test]
    fn test_release_null_is_noop() {
        let mut pool = BuddyPool::new(1 << MIN_ORDER);
        unsafe { pool.release(std::ptr::null_mut()) };
        assert!(full_pool_counts(&pool));
    }
}
