//! Kernel-style leveled logging for ringkit
//!
//! Every line goes to stderr under the stderr lock, so lines printed from
//! collector threads, ring workers and the driving thread never interleave.
//! Each line carries the level, the emitting thread's name and the module
//! path of the call site:
//!
//! ```text
//! [WARN ] rk-timeout-1 ringkit_runtime::timeout: task panicked
//! ```
//!
//! # Environment Variables
//!
//! - `RINGKIT_LOG_LEVEL=<level>` - `off|error|warn|info|debug|trace` or `0..5` (default: warn)
//! - `RINGKIT_FLUSH_EPRINT=1` - Flush stderr after each line
//!
//! # Usage
//!
//! ```ignore
//! use ringkit_core::{kdebug, kwarn};
//!
//! kwarn!("release of stale handle {}", handle);
//! kdebug!("collector {} started", id);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

use crate::env::{env_get_bool, env_get_opt};

/// Log levels, lowest value is most severe.
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
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit. Unknown input yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN ]",
            LogLevel::Info => "[INFO ]",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static INIT: Once = Once::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

/// Read the logging environment. Runs once; later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        if let Some(level) = env_get_opt::<String>("RINGKIT_LOG_LEVEL")
            .as_deref()
            .and_then(LogLevel::parse)
        {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
        FLUSH.store(env_get_bool("RINGKIT_FLUSH_EPRINT", false), Ordering::Relaxed);
    });
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the level read from the environment.
pub fn set_log_level(level: LogLevel) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, target: &str, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let current = std::thread::current();
    let thread = current.name().unwrap_or("-");
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = write!(out, "{} {} {}: ", level.tag(), thread, target);
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

// ── Macros ──

/// Unconditional line to stderr.
#[macro_export]
macro_rules! kprintln {
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::kprint::_klog_impl($level, module_path!(), format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Info < LogLevel::Trace);
    }

    #[test]
    fn test_parse() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" 4 "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from_u8(42), LogLevel::Trace);
    }

    #[test]
    fn test_off_never_enabled() {
        assert!(!level_enabled(LogLevel::Off));
    }

    #[test]
    fn test_macros_expand() {
        kerror!("e {}", 1);
        kwarn!("w");
        kinfo!("i");
        kdebug!("d {}", "x");
        ktrace!("t");
    }
}
