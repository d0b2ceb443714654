//! Page sizing constants and the alignment invariant
//!
//! This module provides the sizing facts the rest of the allocator builds on:
//! - The operating system's base page size, resolved once per process
//! - The huge page size the allocator groups spans into
//! - A build-time check that one maximal alignment unit fits in a huge page

use core::ffi::c_void;

/// Log2 of [`HUGE_PAGE_SIZE`].
pub const HUGE_PAGE_SHIFT: u32 = 21;

/// Size of a huge page (2 MiB).
pub const HUGE_PAGE_SIZE: usize = 1 << HUGE_PAGE_SHIFT;

/// Cache line size assumed for alignment purposes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Structure for discovering the platform's maximal natural alignment.
///
/// Large enough to hold an address, a floating-point word and a size word,
/// rounded up to a cache line. Never instantiated.
#[repr(C, align(64))]
#[allow(dead_code)]
pub(crate) union MemoryAligner {
    p: *mut c_void,
    d: f64,
    s: usize,
}

const _: () = assert!(
    size_of::<MemoryAligner>() < HUGE_PAGE_SIZE,
    "hugepage alignment too small"
);

const _: () = assert!(align_of::<MemoryAligner>() == CACHE_LINE_SIZE);

/// Size of one alignment unit, as checked against [`HUGE_PAGE_SIZE`].
pub const ALIGNMENT_UNIT: usize = size_of::<MemoryAligner>();

/// Base page size of the operating system.
///
/// Queried once through `region` and cached for the rest of the process.
#[inline]
#[must_use]
pub fn page_size() -> usize {
    region::page::size()
}

/// Round `value` up to the next multiple of [`page_size`].
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub fn round_up_to_page(value: usize) -> Option<usize> {
    let mask = page_size() - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Check whether `addr` sits on a page boundary.
#[inline]
#[must_use]
pub fn is_page_aligned(addr: usize) -> bool {
    addr & (page_size() - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligner_fits_in_huge_page() {
        assert!(ALIGNMENT_UNIT < HUGE_PAGE_SIZE);
        assert_eq!(ALIGNMENT_UNIT % CACHE_LINE_SIZE, 0);
        assert!(ALIGNMENT_UNIT >= size_of::<f64>());
        assert!(ALIGNMENT_UNIT >= size_of::<usize>());
    }

    #[test]
    fn test_page_size() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
        assert!(size <= HUGE_PAGE_SIZE);
    }

    #[test]
    fn test_round_up_to_page() {
        let page = page_size();
        assert_eq!(round_up_to_page(0), Some(0));
        assert_eq!(round_up_to_page(1), Some(page));
        assert_eq!(round_up_to_page(page), Some(page));
        assert_eq!(round_up_to_page(page + 1), Some(2 * page));
        assert_eq!(round_up_to_page(usize::MAX), None);
    }

    #[test]
    fn test_is_page_aligned() {
        let page = page_size();
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(page * 3));
        assert!(!is_page_aligned(page + 8));
    }
}
