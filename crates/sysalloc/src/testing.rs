//! Page-accurate fake kernel for unit tests

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use core::ffi::c_int;

use parking_lot::Mutex;

use crate::error::{SysAllocError, SysAllocResult};
use crate::page::page_size;
use crate::sys::{Advice, Kernel, MAP_FIXED_NOREPLACE, Protection};

/// How the fake answers a fixed no-replace request that overlaps a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlacementBehavior {
    /// Fails with `EEXIST`, like Linux >= 4.19
    Reject,
    /// Maps over the existing page, like the pre-4.19 defect
    Overlap,
    /// Ignores the flag and places the mapping elsewhere
    Relocate,
}

/// Record of kernel calls for verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KernelCall {
    Map { addr: usize, len: usize, flags: c_int },
    Unmap { addr: usize, len: usize },
    Advise { addr: usize, len: usize, advice: Advice },
}

#[derive(Debug, Default)]
struct FakeState {
    mapped: BTreeSet<usize>,
    next: usize,
    double_unmaps: usize,
    calls: Vec<KernelCall>,
    scripted: HashMap<Advice, VecDeque<i32>>,
}

/// Fake kernel tracking mapped pages one by one
#[derive(Debug)]
pub(crate) struct FakeKernel {
    placement: PlacementBehavior,
    unsupported: Vec<Advice>,
    default_errors: HashMap<Advice, i32>,
    map_delay: Duration,
    defines_noreplace: bool,
    scratch_failure: bool,
    scratch_at: Option<usize>,
    scratch_maps: AtomicUsize,
    state: Mutex<FakeState>,
}

impl FakeKernel {
    pub(crate) fn new(placement: PlacementBehavior) -> Self {
        Self {
            placement,
            unsupported: Vec::new(),
            default_errors: HashMap::new(),
            map_delay: Duration::ZERO,
            defines_noreplace: true,
            scratch_failure: false,
            scratch_at: None,
            scratch_maps: AtomicUsize::new(0),
            state: Mutex::new(FakeState {
                next: 0x7f00_0000_0000,
                ..FakeState::default()
            }),
        }
    }

    /// Fake that only serves advisories; placement never matters
    pub(crate) fn advisor() -> Self {
        Self::new(PlacementBehavior::Reject)
    }

    /// Hide `advice` from `supports`
    pub(crate) fn without(mut self, advice: Advice) -> Self {
        self.unsupported.push(advice);
        self
    }

    /// Make every unscripted `advice` fail with `errno`
    pub(crate) fn failing(mut self, advice: Advice, errno: i32) -> Self {
        self.default_errors.insert(advice, errno);
        self
    }

    /// Sleep inside every map call, widening race windows
    pub(crate) fn with_map_delay(mut self, delay: Duration) -> Self {
        self.map_delay = delay;
        self
    }

    /// Behave like a target whose headers lack `MAP_FIXED_NOREPLACE`
    pub(crate) fn without_noreplace_flag(mut self) -> Self {
        self.defines_noreplace = false;
        self
    }

    /// Fail every kernel-placed map with `ENOMEM`
    pub(crate) fn failing_scratch_map(mut self) -> Self {
        self.scratch_failure = true;
        self
    }

    /// Place every kernel-chosen map at `addr`
    pub(crate) fn with_scratch_at(mut self, addr: usize) -> Self {
        self.scratch_at = Some(addr);
        self
    }

    /// Queue results for the next calls of `advice` (`0` is success)
    pub(crate) fn script(&self, advice: Advice, results: &[i32]) {
        self.state
            .lock()
            .scripted
            .entry(advice)
            .or_default()
            .extend(results.iter().copied());
    }

    pub(crate) fn calls(&self) -> Vec<KernelCall> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn advisories(&self) -> Vec<Advice> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                KernelCall::Advise { advice, .. } => Some(advice),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn scratch_maps(&self) -> usize {
        self.scratch_maps.load(Ordering::SeqCst)
    }

    pub(crate) fn mapped_pages(&self) -> usize {
        self.state.lock().mapped.len()
    }

    pub(crate) fn double_unmaps(&self) -> usize {
        self.state.lock().double_unmaps
    }

    fn fresh_range(state: &mut FakeState, len: usize) -> usize {
        let page = page_size();
        let addr = state.next;
        state.next += len + 16 * page;
        addr
    }
}

impl Kernel for FakeKernel {
    fn map_anonymous(
        &self,
        addr: usize,
        len: usize,
        _protection: Protection,
        extra_flags: c_int,
    ) -> SysAllocResult<usize> {
        if !self.map_delay.is_zero() {
            std::thread::sleep(self.map_delay);
        }

        let page = page_size();
        let mut state = self.state.lock();
        state.calls.push(KernelCall::Map {
            addr,
            len,
            flags: extra_flags,
        });

        let placed = if addr == 0 {
            self.scratch_maps.fetch_add(1, Ordering::SeqCst);
            if self.scratch_failure {
                return Err(SysAllocError::from_raw_os_error("mmap", libc::ENOMEM));
            }
            match self.scratch_at {
                Some(fixed) => fixed,
                None => Self::fresh_range(&mut state, len),
            }
        } else {
            let overlaps = (addr..addr + len)
                .step_by(page)
                .any(|p| state.mapped.contains(&p));
            let noreplace = extra_flags & MAP_FIXED_NOREPLACE != 0;
            match (overlaps && noreplace, self.placement) {
                (true, PlacementBehavior::Reject) => {
                    return Err(SysAllocError::from_raw_os_error("mmap", libc::EEXIST));
                }
                (true, PlacementBehavior::Relocate) => Self::fresh_range(&mut state, len),
                _ => addr,
            }
        };

        for p in (placed..placed + len).step_by(page) {
            state.mapped.insert(p);
        }
        Ok(placed)
    }

    fn unmap(&self, addr: usize, len: usize) -> SysAllocResult<()> {
        let page = page_size();
        let mut state = self.state.lock();
        state.calls.push(KernelCall::Unmap { addr, len });
        for p in (addr..addr + len).step_by(page) {
            if !state.mapped.remove(&p) {
                state.double_unmaps += 1;
            }
        }
        Ok(())
    }

    fn advise(&self, addr: usize, len: usize, advice: Advice) -> SysAllocResult<()> {
        let mut state = self.state.lock();
        state.calls.push(KernelCall::Advise { addr, len, advice });
        let scripted = state.scripted.get_mut(&advice).and_then(VecDeque::pop_front);
        let code = scripted.unwrap_or_else(|| self.default_errors.get(&advice).copied().unwrap_or(0));

        // Real madvise reports through errno; mirror that so errno handling is exercised.
        if code == 0 {
            Ok(())
        } else {
            ::errno::set_errno(::errno::Errno(code));
            Err(SysAllocError::from_raw_os_error("madvise", code))
        }
    }

    fn supports(&self, advice: Advice) -> bool {
        !self.unsupported.contains(&advice)
    }

    fn defines_fixed_noreplace(&self) -> bool {
        self.defines_noreplace
    }
}
