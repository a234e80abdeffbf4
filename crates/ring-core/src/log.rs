//! Kernel-style leveled logging to stderr.
//!
//! No `tracing`/`log` crate: a single global level filter plus a
//! thread-local worker tag, in the spirit of a kernel's `printk`. One
//! event loop per worker thread means a simple `[w<N>]` prefix already
//! gives each line enough context to untangle concurrent output.
//!
//! # Environment
//!
//! - `RING_LOG_LEVEL` — `off`, `error`, `warn`, `info`, `debug`, `trace`
//!   (or the matching digit `0..=5`). Default `info`.

use crate::env::env_get_str;
use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INIT: OnceLock<()> = OnceLock::new();

/// Read `RING_LOG_LEVEL` once. Safe to call repeatedly; idempotent.
pub fn init() {
    INIT.get_or_init(|| {
        let configured = env_get_str("RING_LOG_LEVEL", "info");
        if let Some(level) = LogLevel::from_str(&configured) {
            LOG_LEVEL.store(level as u8, Ordering::Relaxed);
        }
    });
}

fn current_level() -> LogLevel {
    init();
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Off,
        1 => LogLevel::Error,
        2 => LogLevel::Warn,
        3 => LogLevel::Info,
        4 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

#[inline]
fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= current_level() as u8
}

thread_local! {
    static WORKER_TAG: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Tag every subsequent log line from this thread with `[w<id>]`.
pub fn set_worker_tag(id: u32) {
    WORKER_TAG.with(|w| w.set(Some(id)));
}

fn format_tag() -> String {
    WORKER_TAG.with(|w| match w.get() {
        Some(id) => format!("[w{id}] "),
        None => String::new(),
    })
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} {}", level.prefix(), format_tag());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::log::_log_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn from_str_accepts_name_and_digit() {
        assert_eq!(LogLevel::from_str("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("2"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("bogus"), None);
    }

    #[test]
    fn worker_tag_round_trips() {
        set_worker_tag(7);
        assert_eq!(format_tag(), "[w7] ");
    }

    #[test]
    fn macros_compile_and_run() {
        log_error!("boom {}", 1);
        log_info!("hello");
        log_trace!("{:?}", ());
    }
}
