//! Scoped preservation of the thread's `errno`

use ::errno::{Errno, errno, set_errno};

/// Saves `errno` on creation and writes it back on drop.
///
/// Kernel calls made while the guard is alive may clobber `errno` freely; the
/// caller observes the value it had before the guard was created, on every
/// exit path including early returns.
#[derive(Debug)]
#[must_use = "errno is restored when the guard is dropped"]
pub struct ErrnoGuard {
    saved: Errno,
}

impl ErrnoGuard {
    /// Capture the current `errno`.
    #[inline]
    pub fn new() -> Self {
        Self { saved: errno() }
    }

    /// The value that will be restored.
    #[inline]
    pub fn saved(&self) -> i32 {
        self.saved.0
    }
}

impl Default for ErrnoGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ErrnoGuard {
    #[inline]
    fn drop(&mut self) {
        set_errno(self.saved);
    }
}
