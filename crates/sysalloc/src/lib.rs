#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![allow(unsafe_code)] // Talks to the kernel's virtual-memory interface directly
//! # sysalloc
//!
//! System page backend for a general-purpose memory allocator.
//!
//! This crate sits beneath size classes, spans and free lists. It provides:
//! - A once-per-process probe of whether `MAP_FIXED_NOREPLACE` can be trusted
//! - Page release through `madvise`, steered by a configurable [`ReleasePolicy`]
//! - The page sizing constants and the alignment invariant the allocator relies on
//!
//! ## Features
//!
//! - `serde` (default): `Serialize`/`Deserialize` for [`ReleasePolicy`]
//!
//! ## Example
//!
//! ```no_run
//! use sysalloc::{ReleasePolicy, map_fixed_noreplace_flag, release_pages, set_release_policy};
//!
//! // OR into fixed-address mmap requests; 0 means placement must be verified by hand.
//! let placement_flag = map_fixed_noreplace_flag();
//! println!("no-replace flag: {placement_flag:#x}");
//!
//! set_release_policy(ReleasePolicy::FreeAndDontNeed);
//!
//! # let (span, len) = (std::ptr::null_mut::<u8>(), 0);
//! // SAFETY: `span` is a range this allocator mapped and no longer uses.
//! let released = unsafe { release_pages(span, len) };
//! # let _ = released;
//! ```

#[doc(hidden)]
pub mod check;
pub mod config;
pub mod errno;
pub mod error;
pub mod noreplace;
pub mod page;
pub mod release;
pub mod sys;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{
    GlobalPolicy, PolicySource, ReleasePolicy, init_from_env, release_policy, set_release_policy,
};
pub use error::{SysAllocError, SysAllocResult};
pub use noreplace::{NoReplaceProbe, NoReplaceSupport, map_fixed_noreplace_flag, no_replace_support};
pub use page::{HUGE_PAGE_SIZE, page_size};
pub use release::{PageReleaser, release_pages, release_pages_with_policy};
pub use sys::{Advice, Kernel, SystemKernel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
