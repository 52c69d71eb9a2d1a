//! # buddy-pool
//!
//! A fixed-capacity memory pool using the buddy-system allocation algorithm.
//! One contiguous, anonymously mapped region is managed as power-of-two
//! blocks: allocation splits the first sufficient free block down to size,
//! and release merges a freed block with its buddy whenever the buddy is
//! also free.
//!
//! ## Features
//!
//! - **Buddy allocation**: power-of-two size classes from `2^SMALLEST_ORDER`
//!   up to the pool's configured order
//! - **O(1) free-list operations**: intrusive circular doubly-linked lists
//!   with sentinel headers, one per order
//! - **Order-independent coalescing**: releasing every allocation restores
//!   the pool to a single free block, whatever the free order
//! - **Pluggable backing memory**: a provider trait over the mapping, with
//!   an `mmap(2)`-backed default
//! - **Tracing hooks**: split/merge events are reported through the `log`
//!   facade instead of printing in the hot path
//!
//! ## Example
//!
//! ```rust
//! use buddy_pool::BuddyPool;
//!
//! # fn main() -> std::io::Result<()> {
//! // Create a 1 MiB pool.
//! let mut pool = BuddyPool::new(1024 * 1024);
//!
//! // Allocate a block with at least 4 KiB of payload.
//! let ptr = pool.allocate(4096)?;
//!
//! unsafe {
//!     ptr.as_ptr().write(42);
//!     assert_eq!(*ptr.as_ptr(), 42);
//!
//!     // Return it; the pool coalesces back to a single free block.
//!     pool.release(ptr.as_ptr());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded**: a pool is neither `Send` nor `Sync`; wrap it in
//!   external mutual exclusion if it must be shared
//! - **No resize**: [`BuddyPool::resize`] always reports `Unsupported`
//! - **Unix-only default provider**: the built-in provider requires
//!   `mmap(2)` via `libc`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]

mod buddy;
mod free_list;
mod pool;
mod provider;

pub use buddy::{
    DEFAULT_ORDER, HEADER_SIZE, MAX_ORDER, MIN_ORDER, SMALLEST_ORDER, buddy_offset, order_of,
};
pub use pool::{BuddyPool, BuddyPoolBuilder};
pub use provider::{MemoryProvider, MmapProvider};
