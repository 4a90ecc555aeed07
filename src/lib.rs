//! A table-driven binary-buddy allocator over a single fixed region.
//!
//! [`Buddy`] owns one contiguous region and partitions it into power-of-two
//! blocks recorded in a [`BlockTable`]. Allocation takes the largest free
//! block and halves it until it is as small as the request allows;
//! deallocation frees the block and merges it with its buddy for as long as
//! the buddy is free too.
//!
//! [`Bump`] is a much simpler arena over the same kind of region. It hands out
//! strictly increasing offsets and can only release everything at once.
//!
//! ```
//! use buddy_table::Buddy;
//!
//! let mut buddy = Buddy::try_new(16).unwrap();
//!
//! let a = buddy.allocate(3).unwrap();
//! let b = buddy.allocate(3).unwrap();
//! assert_eq!(buddy.dump_used_blocks(), [(4, 0), (4, 8)]);
//!
//! buddy.deallocate(a.cast()).unwrap();
//! buddy.deallocate(b.cast()).unwrap();
//! assert!(buddy.dump_used_blocks().is_empty());
//! ```
//!
//! ## Logging
//!
//! With the default `log` feature, splits and successful allocations are
//! reported at `trace`, merges at `debug`, and misuse such as freeing an
//! unknown address at `warn`.

#![no_std]
#![doc(html_root_url = "https://docs.rs/buddy_table/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

// No-op stand-ins for the `log` macros when the feature is disabled.
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

mod base;
pub mod buddy;
pub mod bump;
pub mod table;

#[cfg(test)]
mod tests;

use core::{alloc::Layout, fmt, ptr::NonNull};

pub use crate::{
    buddy::{Buddy, UsedBlocks},
    bump::Bump,
    table::{Block, BlockTable, TableError},
};

/// The error type for allocator constructors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// A necessary allocation failed.
    ///
    /// This variant is returned when a constructor attempts to allocate the
    /// managed region, but the underlying allocator fails.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),

    /// The configuration of the allocator is invalid.
    ///
    /// This variant is returned when an allocator's configuration
    /// parameters are impossible to satisfy, such as an empty region.
    InvalidConfig,
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::AllocFailed(layout) => {
                write!(f, "failed to allocate a region of {} bytes", layout.size())
            }
            AllocInitError::InvalidConfig => f.write_str("invalid allocator configuration"),
        }
    }
}

/// The error type for allocator operations.
///
/// A failed operation never leaves the allocator in an inconsistent state;
/// the block table is exactly as it was before the call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// No free block is large enough for the request.
    OutOfSpace,
    /// A zero-byte allocation was requested.
    ZeroSize,
    /// The pointer does not denote a block currently allocated by this
    /// allocator.
    InvalidFree,
    /// The allocation backing a resize could not be made. The original
    /// allocation is still valid.
    ResizeFailed,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocError::OutOfSpace => "no free block is large enough",
            AllocError::ZeroSize => "zero-sized allocation requested",
            AllocError::InvalidFree => "pointer does not denote an allocated block",
            AllocError::ResizeFailed => "resize could not allocate a new block",
        })
    }
}

/// Types which provide memory which backs an allocator.
///
/// This trait is sealed and is implemented by the following types:
/// - The `Raw` marker type indicates that an allocator is not backed by another
///   allocator. This is the case when constructing the allocator from raw
///   pointers. Memory used by this allocator can be reclaimed using
///   `.into_raw_parts()`.
/// - The `Global` marker type indicates that an allocator is backed by the
///   global allocator. The allocator will free its memory on drop.
pub trait BackingAllocator: Sealed {
    /// Deallocates the memory referenced by `ptr`.
    ///
    /// # Safety
    ///
    /// * `ptr` must denote a block of memory currently allocated via this
    ///   allocator, and
    /// * `layout` must be the layout that block was allocated with.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// A marker type indicating that an allocator is backed by raw pointers.
#[derive(Clone, Debug)]
pub struct Raw;
impl Sealed for Raw {}
impl BackingAllocator for Raw {
    unsafe fn deallocate(&self, _: NonNull<u8>, _: Layout) {}
}

/// The global memory allocator.
#[derive(Clone, Debug)]
pub struct Global;
impl Sealed for Global {}
impl BackingAllocator for Global {
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

impl Global {
    /// Allocates a region from the global allocator.
    fn allocate(layout: Layout) -> Result<NonNull<u8>, AllocInitError> {
        if layout.size() == 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        // SAFETY: `layout` has a nonzero size.
        let raw = unsafe { alloc::alloc::alloc(layout) };
        NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))
    }
}

/// The alignment of regions obtained from the global allocator.
const REGION_ALIGN: usize = core::mem::align_of::<usize>();

/// Returns the layout of a globally allocated region of `size` bytes.
fn region_layout(size: usize) -> Result<Layout, AllocInitError> {
    if size == 0 {
        return Err(AllocInitError::InvalidConfig);
    }

    Layout::from_size_align(size, REGION_ALIGN).map_err(|_| AllocInitError::InvalidConfig)
}

#[doc(hidden)]
mod private {
    pub trait Sealed {}
}
use private::Sealed;
