//! Fatal invariant checks
//!
//! [`sys_check!`](crate::sys_check) logs the violated condition through
//! `tracing` and aborts the process. It never panics: nothing above this layer
//! unwinds out of a broken virtual-memory assumption.

/// Log a fatal invariant violation and abort the process.
#[cold]
#[inline(never)]
#[doc(hidden)]
pub fn fatal(condition: &str, file: &str, line: u32, detail: core::fmt::Arguments<'_>) -> ! {
    tracing::error!(
        target: "sysalloc",
        condition,
        file,
        line,
        "fatal invariant violated: {detail}"
    );
    std::process::abort()
}

/// Abort the process unless `cond` holds.
///
/// ```ignore
/// sys_check!(base > page, "probe base {base:#x} leaves no room below it");
/// ```
#[macro_export]
macro_rules! sys_check {
    ($cond:expr $(,)?) => {
        $crate::sys_check!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::check::fatal(stringify!($cond), file!(), line!(), format_args!($($arg)+));
        }
    };
}

/// Log a fatal condition and abort the process unconditionally.
#[macro_export]
macro_rules! sys_fatal {
    ($($arg:tt)+) => {
        $crate::check::fatal("unreachable", file!(), line!(), format_args!($($arg)+))
    };
}
