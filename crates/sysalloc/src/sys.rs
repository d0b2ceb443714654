//! Kernel virtual-memory primitives
//!
//! This module is the only place that talks to the kernel. It provides:
//! - **[`Advice`]** - the advisory mechanisms, each with an optional
//!   per-target `madvise` code resolved at build time
//! - **[`Kernel`]** - the seam the probe and the releaser are written against
//! - **[`SystemKernel`]** - the libc-backed implementation
//!
//! Addresses cross this seam as plain `usize` values so that placement
//! arithmetic is explicit and checked.
//!
//! # Safety
//!
//! [`Kernel`] methods are safe to call, but `unmap` and `advise` act on
//! whatever the kernel has mapped at the given address. Callers inside this
//! crate only pass ranges they mapped themselves or that the caller of an
//! `unsafe` entry point vouched for.

use core::ffi::{c_int, c_void};
use core::ptr;

use crate::error::{SysAllocError, SysAllocResult};

/// The kernel's "fixed, never replace" placement flag.
#[cfg(target_os = "linux")]
pub const MAP_FIXED_NOREPLACE: c_int = libc::MAP_FIXED_NOREPLACE;

/// The kernel's "fixed, never replace" placement flag.
///
/// Not exported by this target's headers. The Linux value keeps the probe
/// code target-independent, but it is never passed to this kernel: see
/// [`HAS_MAP_FIXED_NOREPLACE`].
#[cfg(not(target_os = "linux"))]
pub const MAP_FIXED_NOREPLACE: c_int = 0x10_0000;

/// Whether this target defines [`MAP_FIXED_NOREPLACE`].
///
/// Elsewhere the bit is unknown to `mmap`, which may refuse it with `EINVAL`;
/// such a failure must not be read as a rejected placement.
pub const HAS_MAP_FIXED_NOREPLACE: bool = cfg!(target_os = "linux");

/// Page protection requested for a new mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// No access
    None,
    /// Read and write access
    ReadWrite,
}

impl Protection {
    #[cfg(unix)]
    fn to_unix_flags(self) -> c_int {
        match self {
            Self::None => libc::PROT_NONE,
            Self::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// Advisory mechanisms used to hand backing memory back to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Advice {
    /// Delete backing storage of tmpfs or shared anonymous memory (`MADV_REMOVE`)
    Remove,
    /// Lazily reclaimable under memory pressure (`MADV_FREE`)
    Free,
    /// Drop page tables and anonymous content now (`MADV_DONTNEED`)
    DontNeed,
}

impl Advice {
    /// Platform code for this advice, or `None` when the target lacks it.
    #[must_use]
    pub const fn code(self) -> Option<c_int> {
        match self {
            Self::Remove => remove_code(),
            Self::Free => free_code(),
            Self::DontNeed => dont_need_code(),
        }
    }

    /// Whether the target exposes this advice at all.
    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        self.code().is_some()
    }

    /// Name of the underlying `madvise` constant
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Remove => "MADV_REMOVE",
            Self::Free => "MADV_FREE",
            Self::DontNeed => "MADV_DONTNEED",
        }
    }
}

#[cfg(target_os = "linux")]
const fn remove_code() -> Option<c_int> {
    Some(libc::MADV_REMOVE)
}

#[cfg(not(target_os = "linux"))]
const fn remove_code() -> Option<c_int> {
    None
}

#[cfg(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
))]
const fn free_code() -> Option<c_int> {
    Some(libc::MADV_FREE)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
)))]
const fn free_code() -> Option<c_int> {
    None
}

#[cfg(unix)]
const fn dont_need_code() -> Option<c_int> {
    Some(libc::MADV_DONTNEED)
}

#[cfg(not(unix))]
const fn dont_need_code() -> Option<c_int> {
    None
}

/// Virtual-memory operations the backend needs from the kernel
pub trait Kernel: Send + Sync {
    /// Map `len` bytes of private anonymous memory.
    ///
    /// `addr == 0` lets the kernel choose. `extra_flags` are OR-ed into
    /// `MAP_PRIVATE | MAP_ANONYMOUS`. Returns the address actually mapped.
    fn map_anonymous(
        &self,
        addr: usize,
        len: usize,
        protection: Protection,
        extra_flags: c_int,
    ) -> SysAllocResult<usize>;

    /// Unmap `[addr, addr + len)`.
    fn unmap(&self, addr: usize, len: usize) -> SysAllocResult<()>;

    /// Issue one advisory over `[addr, addr + len)`.
    fn advise(&self, addr: usize, len: usize, advice: Advice) -> SysAllocResult<()>;

    /// Whether `advice` exists on this kernel.
    fn supports(&self, advice: Advice) -> bool {
        advice.is_available()
    }

    /// Whether [`MAP_FIXED_NOREPLACE`] is a flag this kernel defines.
    fn defines_fixed_noreplace(&self) -> bool {
        HAS_MAP_FIXED_NOREPLACE
    }
}

/// [`Kernel`] backed by libc
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemKernel;

#[cfg(unix)]
impl Kernel for SystemKernel {
    fn map_anonymous(
        &self,
        addr: usize,
        len: usize,
        protection: Protection,
        extra_flags: c_int,
    ) -> SysAllocResult<usize> {
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | extra_flags;

        // SAFETY: anonymous mapping, fd=-1 and offset=0. A non-null `addr` is a
        // hint unless `extra_flags` carries a fixed-placement flag; callers
        // only pass MAP_FIXED_NOREPLACE, which never replaces existing pages.
        let mapped = unsafe {
            libc::mmap(
                ptr::with_exposed_provenance_mut::<c_void>(addr),
                len,
                protection.to_unix_flags(),
                flags,
                -1,
                0,
            )
        };

        if mapped == libc::MAP_FAILED {
            Err(SysAllocError::last_os_error("mmap"))
        } else {
            Ok(mapped.expose_provenance())
        }
    }

    fn unmap(&self, addr: usize, len: usize) -> SysAllocResult<()> {
        // SAFETY: callers only unmap ranges they obtained from `map_anonymous`.
        let rc = unsafe { libc::munmap(ptr::with_exposed_provenance_mut::<c_void>(addr), len) };
        if rc == 0 {
            Ok(())
        } else {
            Err(SysAllocError::last_os_error("munmap"))
        }
    }

    fn advise(&self, addr: usize, len: usize, advice: Advice) -> SysAllocResult<()> {
        let Some(code) = advice.code() else {
            return Err(SysAllocError::not_supported(advice.name()));
        };

        // SAFETY: advisories never change the address space layout; the range
        // belongs to the caller, who accepted losing its contents.
        let rc = unsafe { libc::madvise(ptr::with_exposed_provenance_mut::<c_void>(addr), len, code) };
        if rc == 0 {
            Ok(())
        } else {
            Err(SysAllocError::last_os_error("madvise"))
        }
    }
}

#[cfg(not(unix))]
impl Kernel for SystemKernel {
    fn map_anonymous(
        &self,
        _addr: usize,
        _len: usize,
        _protection: Protection,
        _extra_flags: c_int,
    ) -> SysAllocResult<usize> {
        Err(SysAllocError::not_supported("mmap"))
    }

    fn unmap(&self, _addr: usize, _len: usize) -> SysAllocResult<()> {
        Err(SysAllocError::not_supported("munmap"))
    }

    fn advise(&self, _addr: usize, _len: usize, advice: Advice) -> SysAllocResult<()> {
        Err(SysAllocError::not_supported(advice.name()))
    }
}
