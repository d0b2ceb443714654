//! Error types for sysalloc
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Neither of the two core operations surfaces an error: the capability probe
//! aborts on its two fatal invariants and otherwise degrades to `0`, and page
//! release reports a plain `bool`. These types cover the fallible edges around
//! them: configuration parsing and individual kernel calls.

use std::io;

use thiserror::Error;

/// Errors produced by sysalloc
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SysAllocError {
    /// A release policy name did not match any known policy
    #[error("Invalid release policy '{value}' (expected one of: never, dontneed, free, free_and_dontneed)")]
    InvalidPolicy {
        /// The rejected input
        value: String,
    },

    /// An environment variable could not be read
    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv {
        /// Variable name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// A kernel call failed
    #[error("Kernel call '{operation}' failed: {source}")]
    Kernel {
        /// The call that failed (`mmap`, `munmap`, `madvise`)
        operation: &'static str,
        /// The OS error reported by the call
        #[source]
        source: io::Error,
    },

    /// The target has no implementation of a kernel facility
    #[error("Feature not supported on this platform: {feature}")]
    NotSupported {
        /// Missing facility
        feature: &'static str,
    },
}

impl SysAllocError {
    /// Check if the failed kernel call may succeed when issued again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kernel { source, .. } => source.raw_os_error() == Some(libc::EAGAIN),
            _ => false,
        }
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPolicy { .. } => "SYSALLOC:CONFIG:POLICY",
            Self::InvalidEnv { .. } => "SYSALLOC:CONFIG:ENV",
            Self::Kernel { .. } => "SYSALLOC:KERNEL",
            Self::NotSupported { .. } => "SYSALLOC:UNSUPPORTED",
        }
    }

    /// Raw OS error number behind a kernel failure, if any
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Kernel { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Create invalid policy error
    pub fn invalid_policy(value: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            value: value.into(),
        }
    }

    /// Create invalid environment error
    pub fn invalid_env(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidEnv {
            name,
            reason: reason.into(),
        }
    }

    /// Capture `errno` after a failed kernel call
    pub fn last_os_error(operation: &'static str) -> Self {
        Self::Kernel {
            operation,
            source: io::Error::last_os_error(),
        }
    }

    /// Wrap a raw OS error number
    pub fn from_raw_os_error(operation: &'static str, code: i32) -> Self {
        Self::Kernel {
            operation,
            source: io::Error::from_raw_os_error(code),
        }
    }

    /// Create not supported error
    pub fn not_supported(feature: &'static str) -> Self {
        Self::NotSupported { feature }
    }
}

/// Result type for sysalloc operations
pub type SysAllocResult<T> = Result<T, SysAllocError>;
