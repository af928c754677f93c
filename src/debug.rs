//! Per-section debug trace gating via environment variables.
//!
//! `JUNCTION_DEBUG` turns every section on. Failing that, each
//! `JUNCTION_DEBUG_<SECTION>` variable gates one section. The bitmap is read
//! from the environment exactly once (lazily, on first use); the point is a
//! cheap early-out that avoids building a `log` record nobody will see, not
//! a live-reloadable setting.

use std::sync::OnceLock;

pub mod section {
    pub const MESSAGE: u32 = 1 << 0;
    pub const PORT: u32 = 1 << 1;
    pub const RECEIVER: u32 = 1 << 2;
    pub const ARBITER: u32 = 1 << 3;
    pub const SCHEDULER: u32 = 1 << 4;
    pub const THREAD: u32 = 1 << 5;
    pub const TASK: u32 = 1 << 6;
    pub const QUEUE: u32 = 1 << 7;
    pub const STACK: u32 = 1 << 8;
    pub const RROBIN: u32 = 1 << 9;
}

static BITMAP: OnceLock<u32> = OnceLock::new();

const SECTIONS: &[(&str, u32)] = &[
    ("JUNCTION_DEBUG_MESSAGE", section::MESSAGE),
    ("JUNCTION_DEBUG_PORT", section::PORT),
    ("JUNCTION_DEBUG_RECEIVER", section::RECEIVER),
    ("JUNCTION_DEBUG_ARBITER", section::ARBITER),
    ("JUNCTION_DEBUG_SCHEDULER", section::SCHEDULER),
    ("JUNCTION_DEBUG_THREAD", section::THREAD),
    ("JUNCTION_DEBUG_TASK", section::TASK),
    ("JUNCTION_DEBUG_QUEUE", section::QUEUE),
    ("JUNCTION_DEBUG_STACK", section::STACK),
    ("JUNCTION_DEBUG_RROBIN", section::RROBIN),
];

fn compute_from_env() -> u32 {
    if std::env::var_os("JUNCTION_DEBUG").is_some() {
        return u32::MAX;
    }
    SECTIONS.iter().fold(0, |bits, (var, flag)| {
        if std::env::var_os(var).is_some() {
            bits | flag
        } else {
            bits
        }
    })
}

fn bitmap() -> u32 {
    *BITMAP.get_or_init(compute_from_env)
}

/// Whether trace logging for `section` is currently enabled.
#[inline]
pub fn enabled(section: u32) -> bool {
    bitmap() & section != 0
}

/// Emits `trace!` under `target` only if `section` is enabled, so building
/// the formatted message is skipped entirely when it is not.
macro_rules! trace_section {
    ($section:expr, $target:expr, $($arg:tt)+) => {
        if $crate::debug::enabled($section) {
            ::log::trace!(target: $target, $($arg)+);
        }
    };
}

pub(crate) use trace_section;
