//! Device-visible memory regions.
//!
//! The accelerator reads sources and writes results by virtual address,
//! walking the page tables itself. Regions are therefore allocated page
//! aligned, zeroed and pre-faulted, and they never move or shrink while
//! owned. Allocation failure is not recoverable: it goes through the global
//! allocation error handler.

use crate::AccelError;
use accel_common::memory::{MIN_REGION_ALIGN, PAGE_SIZE, WINDOW_GRANULE};
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use tracing::debug;

/// Page-aligned, zero-initialised block of memory owned by the caller.
///
/// The device accesses the block only through addresses handed to it by a
/// dispatch; it never reallocates or frees it. Dereferences to a byte slice
/// for host-side access.
pub struct DeviceRegion {
    /// Base of the allocation, page aligned.
    ptr: NonNull<u8>,

    /// Length in bytes, exactly as requested.
    len: usize,
}

impl DeviceRegion {
    /// Allocates a region of exactly `len` bytes.
    ///
    /// The base is aligned to [`PAGE_SIZE`] and the first byte of every page
    /// is written with zero before returning, so the mapping is resident when
    /// the device first touches it.
    ///
    /// # Arguments
    ///
    /// * `len` - Size of the region in bytes
    ///
    /// # Returns
    ///
    /// The region, or an error if `len` is zero or too large for a layout.
    ///
    /// # Panics
    ///
    /// Panics if the allocator returns a base that is not 8-byte aligned.
    pub fn allocate(len: usize) -> Result<Self, AccelError> {
        if len == 0 {
            return Err(AccelError::EmptyRegion);
        }
        let layout =
            Layout::from_size_align(len, PAGE_SIZE).map_err(|_| AccelError::OutOfMemory)?;

        // SAFETY: the layout has a nonzero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };

        for offset in (0..len).step_by(PAGE_SIZE) {
            // SAFETY: offset < len, inside the allocation.
            unsafe { ptr.as_ptr().add(offset).write_volatile(0) };
        }

        let base = ptr.as_ptr() as usize;
        assert!(
            base & (MIN_REGION_ALIGN - 1) == 0,
            "device region base {base:#x} is not {MIN_REGION_ALIGN}-byte aligned"
        );
        debug!(len, base, "constructed device region, paged-in");

        Ok(Self { ptr, len })
    }

    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region holds no bytes.
    ///
    /// [`DeviceRegion::allocate`] rejects zero lengths, so this is false for
    /// every live region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address as handed to the device.
    pub fn base_addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    /// Zeroes the first `len` bytes, clamped to the region length.
    ///
    /// Used between runs so results left over from an earlier request cannot
    /// be mistaken for fresh device output.
    pub fn clear(&mut self, len: usize) {
        let len = len.min(self.len);
        self[..len].fill(0);
    }

    /// Starts carving padded windows from the start of the region.
    pub fn cursor(&mut self) -> RegionCursor<'_> {
        RegionCursor::new(self)
    }
}

impl Deref for DeviceRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialised bytes for the lifetime of self.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for DeviceRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for DeviceRegion {
    fn drop(&mut self) {
        // The layout was valid at allocation time and the length never changes.
        if let Ok(layout) = Layout::from_size_align(self.len, PAGE_SIZE) {
            // SAFETY: ptr came from alloc_zeroed with this exact layout.
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for DeviceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegion")
            .field("base", &format_args!("{:#018x}", self.base_addr()))
            .field("len", &self.len)
            .finish()
    }
}

/// DeviceRegion owns its allocation outright.
///
/// The raw pointer is never shared outside the borrow rules of the slice
/// views, so moving or sharing the region between threads is sound.
unsafe impl Send for DeviceRegion {}
unsafe impl Sync for DeviceRegion {}

/// Rounds a payload length up to its window size inside a shared region.
///
/// Windows always end with at least one granule of padding after the
/// payload, matching how multi-output runs lay results side by side.
pub fn padded_len(len: usize) -> usize {
    (len / WINDOW_GRANULE + 1) * WINDOW_GRANULE
}

/// Region size needed to lay out windows for every length in `lens`.
///
/// Adds one page of slack on top of the padded total so the layout can be
/// shifted by a per-run skew without running off the end.
pub fn corpus_capacity<I>(lens: I) -> usize
where
    I: IntoIterator<Item = usize>,
{
    lens.into_iter().map(padded_len).sum::<usize>() + PAGE_SIZE
}

/// Bump cursor that hands out consecutive padded windows of a region.
///
/// Each window is a disjoint mutable slice, so several of them can be in
/// flight on different pipelines at once.
pub struct RegionCursor<'r> {
    /// Not yet carved part of the region.
    rest: &'r mut [u8],

    /// Bytes consumed from the start of the region, skew included.
    offset: usize,
}

impl<'r> RegionCursor<'r> {
    pub fn new(region: &'r mut DeviceRegion) -> Self {
        Self {
            rest: &mut region[..],
            offset: 0,
        }
    }

    /// Skips `bytes` before the first window.
    ///
    /// Runs that reuse one region for several iterations shift the layout by
    /// a multiple of the window granule each time so every run writes fresh
    /// addresses.
    pub fn skip(&mut self, bytes: usize) -> Result<(), AccelError> {
        if bytes > self.rest.len() {
            return Err(AccelError::RegionExhausted {
                requested: bytes,
                remaining: self.rest.len(),
            });
        }
        let rest = core::mem::take(&mut self.rest);
        self.rest = &mut rest[bytes..];
        self.offset += bytes;
        Ok(())
    }

    /// Carves the next window able to hold `len` bytes.
    ///
    /// # Returns
    ///
    /// A slice of `padded_len(len)` bytes, or an error if the region does not
    /// have that much left.
    pub fn carve(&mut self, len: usize) -> Result<&'r mut [u8], AccelError> {
        let padded = padded_len(len);
        if padded > self.rest.len() {
            return Err(AccelError::RegionExhausted {
                requested: padded,
                remaining: self.rest.len(),
            });
        }
        let rest = core::mem::take(&mut self.rest);
        let (window, tail) = rest.split_at_mut(padded);
        self.rest = tail;
        self.offset += padded;
        Ok(window)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}
