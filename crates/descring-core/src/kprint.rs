//! Leveled stderr logging
//!
//! Each message is one `writeln!` on a locked stderr handle, so lines from
//! different cores never interleave. The threshold comes from
//! `DESCRING_LOG_LEVEL` (`off`, `error`, `warn`, `info`, `debug`, `trace`
//! or 0-5) the first time anything logs, unless `set_log_level` ran first.
//!
//! ```ignore
//! use descring_core::{kinfo, kbug};
//!
//! kinfo!("{}: ring {} slots", core, capacity);
//! kbug!("lazy list of {} overflowed", core); // logs, then panics
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;

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
    /// Parse a level name or number; unknown strings give `None`
    pub fn parse(s: &str) -> Option<Self> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => return None,
        };
        Some(level)
    }

    fn label(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FROM_ENV: Once = Once::new();

/// Read `DESCRING_LOG_LEVEL`; later calls do nothing
pub fn init() {
    FROM_ENV.call_once(|| {
        if let Some(level) = std::env::var("DESCRING_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            THRESHOLD.store(level as u8, Ordering::Relaxed);
        }
    });
}

/// Override the threshold; the environment is not consulted afterwards
pub fn set_log_level(level: LogLevel) {
    init();
    THRESHOLD.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    init();
    level != LogLevel::Off && level as u8 <= THRESHOLD.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if level_enabled(level) {
        let _ = writeln!(std::io::stderr().lock(), "[descring {}] {}", level.label(), args);
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) };
}

/// Fatal invariant violation: log at error level, then panic
///
/// The release profile aborts on panic, so this terminates the process.
#[macro_export]
macro_rules! kbug {
    ($($arg:tt)*) => {{
        $crate::__klog!(Error, "BUG: {}", format_args!($($arg)*));
        panic!($($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(LogLevel::parse(" DEBUG "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("2"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error < LogLevel::Trace);
    }

    #[test]
    fn test_threshold() {
        set_log_level(LogLevel::Info);
        assert!(level_enabled(LogLevel::Warn));
        assert!(!level_enabled(LogLevel::Debug));

        set_log_level(LogLevel::Off);
        assert!(!level_enabled(LogLevel::Error));
        assert!(!level_enabled(LogLevel::Off));
        kerror!("error {}", "msg");
        kwarn!("warn");
        kinfo!("info");
        kdebug!("debug");
        ktrace!("trace");
    }

    #[test]
    #[should_panic(expected = "overflow on core3")]
    fn test_kbug_panics() {
        kbug!("overflow on core{}", 3);
    }
}
