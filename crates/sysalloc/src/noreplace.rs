//! Capability probe for fixed, no-replace placement
//!
//! `MAP_FIXED_NOREPLACE` asks the kernel to place a mapping at an exact
//! address or fail, instead of silently replacing whatever is there. Kernels
//! answer such a request in one of three ways:
//!
//! - **reject** it with `EEXIST` when it overlaps an existing mapping (the flag
//!   works);
//! - **map over** the existing pages anyway (Linux before 4.19, see
//!   torvalds/linux@7aa867dd8952);
//! - **relocate** it, treating the address as a hint (the flag is unknown).
//!
//! Only the first outcome makes the flag trustworthy. The probe maps a scratch
//! page, asks for a two-page no-replace mapping starting one page below it,
//! and classifies the answer. It runs at most once per process.
//!
//! Targets whose headers do not define the flag are never probed: their
//! `mmap` may refuse the unknown bit outright, which is indistinguishable from
//! a rejection. They report [`NoReplaceSupport::Unavailable`].

use core::ffi::c_int;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Once;

use crate::page::page_size;
use crate::sys::{Kernel, MAP_FIXED_NOREPLACE, Protection, SystemKernel};
use crate::{sys_check, sys_fatal};

/// How the kernel answered an overlapping no-replace placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NoReplaceSupport {
    /// The request failed; the flag is honoured
    Rejected = 1,
    /// The request silently overlapped the existing mapping
    OverlapAllowed = 2,
    /// The request landed at a different address
    Relocated = 3,
    /// The target does not define the flag; nothing was asked of the kernel
    Unavailable = 4,
}

impl NoReplaceSupport {
    /// Flag to OR into fixed-address mapping requests for this outcome
    #[inline]
    #[must_use]
    pub const fn flag(self) -> c_int {
        match self {
            Self::Rejected => MAP_FIXED_NOREPLACE,
            Self::OverlapAllowed | Self::Relocated | Self::Unavailable => 0,
        }
    }

    /// Whether placement with the flag can be trusted
    #[inline]
    #[must_use]
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::Rejected)
    }

    const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Rejected),
            2 => Some(Self::OverlapAllowed),
            3 => Some(Self::Relocated),
            4 => Some(Self::Unavailable),
            _ => None,
        }
    }
}

impl fmt::Display for NoReplaceSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "rejected"),
            Self::OverlapAllowed => write!(f, "overlap-allowed"),
            Self::Relocated => write!(f, "relocated"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

const UNPROBED: u8 = 0;

/// Compute-once gate around the no-replace probe.
///
/// The first caller runs the probe against `K`; every other caller, whether it
/// arrives before, during or after that run, blocks until it finishes and then
/// reads the same result.
pub struct NoReplaceProbe<K> {
    once: Once,
    support: AtomicU8,
    kernel: K,
}

impl<K: Kernel> NoReplaceProbe<K> {
    /// Create an unprobed gate over `kernel`.
    pub const fn new(kernel: K) -> Self {
        Self {
            once: Once::new(),
            support: AtomicU8::new(UNPROBED),
            kernel,
        }
    }

    /// Classified probe outcome, probing first if needed.
    pub fn support(&self) -> NoReplaceSupport {
        self.once.call_once(|| {
            let support = probe(&self.kernel);
            self.support.store(support as u8, Ordering::Release);
        });

        let Some(support) = NoReplaceSupport::from_u8(self.support.load(Ordering::Acquire)) else {
            sys_fatal!("no-replace probe finished without recording a result")
        };
        support
    }

    /// Flag to OR into fixed-address mapping requests, or `0`.
    #[inline]
    pub fn flag(&self) -> c_int {
        self.support().flag()
    }

    /// Whether the probe has already run.
    #[inline]
    pub fn is_probed(&self) -> bool {
        self.once.state().done()
    }

    /// The kernel this gate probes.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K> fmt::Debug for NoReplaceProbe<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoReplaceProbe")
            .field(
                "support",
                &NoReplaceSupport::from_u8(self.support.load(Ordering::Acquire)),
            )
            .finish()
    }
}

fn probe<K: Kernel + ?Sized>(kernel: &K) -> NoReplaceSupport {
    if !kernel.defines_fixed_noreplace() {
        tracing::debug!("MAP_FIXED_NOREPLACE not defined on this target");
        return NoReplaceSupport::Unavailable;
    }

    let page = page_size();

    let base = match kernel.map_anonymous(0, page, Protection::None, 0) {
        Ok(base) => base,
        Err(err) => sys_fatal!("could not map no-replace probe page: {err}"),
    };

    // Start one page below `base` so the new range overlaps it by exactly one page.
    // Address 0 would turn the request into "kernel's choice".
    let target = base.checked_sub(page).unwrap_or(0);
    sys_check!(
        target != 0,
        "probe page at {base:#x} leaves no room below it (page size {page:#x})"
    );

    let support = match kernel.map_anonymous(target, 2 * page, Protection::None, MAP_FIXED_NOREPLACE)
    {
        Err(err) => {
            tracing::trace!(addr = target, %err, "no-replace placement rejected");
            NoReplaceSupport::Rejected
        }
        Ok(placed) if placed == target => {
            // [target, target + 2 pages) covers `base`; the unmap of `base` below
            // releases the second page.
            unmap_quietly(kernel, placed, page);
            NoReplaceSupport::OverlapAllowed
        }
        Ok(placed) => {
            unmap_quietly(kernel, placed, 2 * page);
            NoReplaceSupport::Relocated
        }
    };

    unmap_quietly(kernel, base, page);

    tracing::debug!(
        %support,
        flag = support.flag(),
        "probed MAP_FIXED_NOREPLACE"
    );
    support
}

fn unmap_quietly<K: Kernel + ?Sized>(kernel: &K, addr: usize, len: usize) {
    if let Err(err) = kernel.unmap(addr, len) {
        tracing::debug!(addr, len, %err, "probe cleanup unmap failed");
    }
}

static SYSTEM_PROBE: NoReplaceProbe<SystemKernel> = NoReplaceProbe::new(SystemKernel);

/// Flag to combine into fixed-address mapping requests.
///
/// Returns `MAP_FIXED_NOREPLACE` when this kernel is proven to reject
/// overlapping placements, `0` otherwise. The first call probes the kernel;
/// concurrent first callers wait for that single probe.
#[must_use]
pub fn map_fixed_noreplace_flag() -> c_int {
    SYSTEM_PROBE.flag()
}

/// How this kernel answered the no-replace probe.
#[must_use]
pub fn no_replace_support() -> NoReplaceSupport {
    SYSTEM_PROBE.support()
}
