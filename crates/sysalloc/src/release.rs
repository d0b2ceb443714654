//! Returning page backing memory to the kernel
//!
//! Releasing is a cascade of advisories:
//!
//! 1. `MADV_REMOVE`, where the target has it. On success the release is done
//!    and the policy is never read. On private memory it fails with `EINVAL`,
//!    which is expected.
//! 2. `MADV_FREE`, when the policy is [`FreeOnly`] or [`FreeAndDontNeed`].
//! 3. `MADV_DONTNEED`, when the policy is [`DontNeed`] or [`FreeAndDontNeed`].
//!
//! The result is that of the last advisory attempted. An advisory failing with
//! `EAGAIN` is reissued immediately, as often as it takes. Every other failure
//! is swallowed: a release that does nothing only costs memory.
//!
//! [`FreeOnly`]: ReleasePolicy::FreeOnly
//! [`FreeAndDontNeed`]: ReleasePolicy::FreeAndDontNeed
//! [`DontNeed`]: ReleasePolicy::DontNeed

use core::fmt;

use crate::config::{GlobalPolicy, PolicySource, ReleasePolicy};
use crate::errno::ErrnoGuard;
use crate::error::SysAllocResult;
use crate::sys::{Advice, Kernel, SystemKernel};

/// The release cascade bound to a kernel and a policy source
pub struct PageReleaser<K, P> {
    kernel: K,
    policy: P,
}

impl<K: Kernel, P: PolicySource> PageReleaser<K, P> {
    /// Bind a releaser to `kernel`, reading policy from `policy`.
    pub const fn new(kernel: K, policy: P) -> Self {
        Self { kernel, policy }
    }

    /// Advise the kernel that `[start, start + length)` may be discarded.
    ///
    /// Returns whether the last advisory attempted succeeded, `false` when none
    /// was. `errno` is the same on return as on entry.
    pub fn release(&self, start: usize, length: usize) -> bool {
        let _errno = ErrnoGuard::new();

        let mut released = false;

        if self.kernel.supports(Advice::Remove) {
            released = self.advise(start, length, Advice::Remove);
            if released {
                return true;
            }
        }

        let policy = self.policy.release_policy();

        if policy.lazy_free() && self.kernel.supports(Advice::Free) {
            released = self.advise(start, length, Advice::Free);
        }

        if policy.dont_need() && self.kernel.supports(Advice::DontNeed) {
            released = self.advise(start, length, Advice::DontNeed);
        }

        released
    }

    /// Issue `advice`, reissuing it for as long as the kernel answers `EAGAIN`.
    fn advise(&self, start: usize, length: usize, advice: Advice) -> bool {
        let result = retry_on_eagain(|| self.kernel.advise(start, length, advice));
        match result {
            Ok(()) => {
                tracing::trace!(advice = advice.name(), start, length, "advisory accepted");
                true
            }
            Err(err) => {
                tracing::trace!(advice = advice.name(), start, length, %err, "advisory refused");
                false
            }
        }
    }

    /// The kernel this releaser advises.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K, P> fmt::Debug for PageReleaser<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageReleaser").finish_non_exhaustive()
    }
}

fn retry_on_eagain(mut call: impl FnMut() -> SysAllocResult<()>) -> SysAllocResult<()> {
    loop {
        match call() {
            Err(err) if err.is_retryable() => {}
            result => return result,
        }
    }
}

static SYSTEM_RELEASER: PageReleaser<SystemKernel, GlobalPolicy> =
    PageReleaser::new(SystemKernel, GlobalPolicy);

/// Hint that the backing memory of `[start, start + length)` may be discarded.
///
/// Reads the process-wide [`ReleasePolicy`] on every call. Where the target
/// has `MADV_REMOVE` and it succeeds, the release finishes there regardless of
/// the policy. The return value is advisory: callers must behave the same
/// whether it is `true` or `false`. `errno` is preserved.
///
/// # Safety
///
/// `[start, start + length)` must lie in mappings owned by the caller whose
/// contents may be lost: after a successful release, anonymous pages read back
/// as zero.
pub unsafe fn release_pages(start: *mut u8, length: usize) -> bool {
    SYSTEM_RELEASER.release(start.expose_provenance(), length)
}

/// Same as [`release_pages`] under a fixed `policy`, ignoring the global one.
///
/// # Safety
///
/// See [`release_pages`].
pub unsafe fn release_pages_with_policy(
    start: *mut u8,
    length: usize,
    policy: ReleasePolicy,
) -> bool {
    PageReleaser::new(SystemKernel, policy).release(start.expose_provenance(), length)
}
