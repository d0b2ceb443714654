use sysalloc::page::{HUGE_PAGE_SIZE, is_page_aligned};
use sysalloc::sys::Protection;
use sysalloc::{Advice, Kernel, SystemKernel};

fn main() -> sysalloc::SysAllocResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let policy = sysalloc::init_from_env()?.unwrap_or_else(sysalloc::release_policy);

    println!("=== Page Backend ===");
    println!("page size      : {}", sysalloc::page_size());
    println!("huge page size : {HUGE_PAGE_SIZE}");
    println!("no-replace     : {}", sysalloc::no_replace_support());
    println!("placement flag : {:#x}", sysalloc::map_fixed_noreplace_flag());
    println!("release policy : {policy}");

    for advice in [Advice::Remove, Advice::Free, Advice::DontNeed] {
        println!("{:<14} : {}", advice.name(), advice.is_available());
    }

    let len = 8 * sysalloc::page_size();
    let addr = SystemKernel.map_anonymous(0, len, Protection::ReadWrite, 0)?;
    assert!(is_page_aligned(addr));

    // SAFETY: the span was mapped above and is never read again.
    let released =
        unsafe { sysalloc::release_pages(std::ptr::with_exposed_provenance_mut(addr), len) };
    println!("released 8 pages: {released}");

    SystemKernel.unmap(addr, len)
}
