//! Release policy configuration
//!
//! The policy decides which advisories [`release_pages`](crate::release_pages)
//! issues when pages go back to the kernel. It lives in a process-wide atomic
//! and is read fresh on every release, so a change applies to the next call.

use core::fmt;
use core::str::FromStr;
use core::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{SysAllocError, SysAllocResult};

/// Environment variable read by [`init_from_env`].
pub const RELEASE_POLICY_ENV: &str = "SYSALLOC_RELEASE_POLICY";

/// Which advisories to issue when releasing pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum ReleasePolicy {
    /// Issue no policy-driven advisory
    Never = 0,
    /// Drop pages immediately (`MADV_DONTNEED`)
    #[default]
    DontNeed = 1,
    /// Mark pages lazily reclaimable (`MADV_FREE`)
    FreeOnly = 2,
    /// Lazy free followed by an immediate drop
    FreeAndDontNeed = 3,
}

impl ReleasePolicy {
    /// All policies, in declaration order
    pub const ALL: [Self; 4] = [
        Self::Never,
        Self::DontNeed,
        Self::FreeOnly,
        Self::FreeAndDontNeed,
    ];

    /// Whether the lazy-free advisory runs under this policy
    #[inline]
    #[must_use]
    pub const fn lazy_free(self) -> bool {
        matches!(self, Self::FreeOnly | Self::FreeAndDontNeed)
    }

    /// Whether the immediate-discard advisory runs under this policy
    #[inline]
    #[must_use]
    pub const fn dont_need(self) -> bool {
        matches!(self, Self::DontNeed | Self::FreeAndDontNeed)
    }

    /// Canonical lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::DontNeed => "dont_need",
            Self::FreeOnly => "free_only",
            Self::FreeAndDontNeed => "free_and_dont_need",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Never,
            2 => Self::FreeOnly,
            3 => Self::FreeAndDontNeed,
            _ => Self::DontNeed,
        }
    }
}

impl fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleasePolicy {
    type Err = SysAllocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "never" | "none" => Ok(Self::Never),
            "dontneed" | "dont_need" => Ok(Self::DontNeed),
            "free" | "free_only" => Ok(Self::FreeOnly),
            "free_and_dontneed" | "free_and_dont_need" => Ok(Self::FreeAndDontNeed),
            _ => Err(SysAllocError::invalid_policy(s)),
        }
    }
}

static RELEASE_POLICY: AtomicU8 = AtomicU8::new(ReleasePolicy::DontNeed as u8);

/// Current process-wide release policy
#[inline]
#[must_use]
pub fn release_policy() -> ReleasePolicy {
    ReleasePolicy::from_u8(RELEASE_POLICY.load(Ordering::Relaxed))
}

/// Replace the process-wide release policy, returning the previous one
pub fn set_release_policy(policy: ReleasePolicy) -> ReleasePolicy {
    let previous = ReleasePolicy::from_u8(RELEASE_POLICY.swap(policy as u8, Ordering::Relaxed));
    if previous != policy {
        tracing::debug!(%previous, current = %policy, "release policy changed");
    }
    previous
}

/// Load the release policy from [`RELEASE_POLICY_ENV`].
///
/// Leaves the current policy untouched when the variable is unset and returns
/// `Ok(None)`. Returns the installed policy otherwise.
pub fn init_from_env() -> SysAllocResult<Option<ReleasePolicy>> {
    let raw = match std::env::var(RELEASE_POLICY_ENV) {
        Ok(raw) => raw,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            return Err(SysAllocError::invalid_env(
                RELEASE_POLICY_ENV,
                "value is not valid unicode",
            ));
        }
    };

    let policy = raw.parse::<ReleasePolicy>()?;
    set_release_policy(policy);
    Ok(Some(policy))
}

/// Where a releaser reads its policy from
pub trait PolicySource {
    /// Policy to apply to the release in progress
    fn release_policy(&self) -> ReleasePolicy;
}

/// Reads the process-wide policy on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalPolicy;

impl PolicySource for GlobalPolicy {
    #[inline]
    fn release_policy(&self) -> ReleasePolicy {
        release_policy()
    }
}

impl PolicySource for ReleasePolicy {
    #[inline]
    fn release_policy(&self) -> ReleasePolicy {
        *self
    }
}
