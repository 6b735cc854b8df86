//! File logging for the engine.
//!
//! The coordinator and CLI share stdout with worker progress output, so
//! diagnostics go to `~/.tandem/tandem.log` instead. The log appends
//! across runs; each `init` writes a session header so runs can be told
//! apart. Verbosity comes from the `--debug` flag, `TANDEM_DEBUG=1`, or
//! an explicit `TANDEM_LOG` level (error/warn/info/debug/trace).
//!
//! Logging must never interfere with a request: every failure in here is
//! swallowed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Severity threshold for a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

/// Initialize logging at the default verbosity.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging, resolving verbosity from the flag and environment.
///
/// Precedence: `TANDEM_LOG` names an exact level; otherwise `--debug` or
/// `TANDEM_DEBUG=1` raise the threshold to debug; otherwise info.
pub fn init_with_debug(debug: bool) {
    let level = resolve_level(debug);
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(dir) = dirs::home_dir().map(|h| h.join(".tandem")) {
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("tandem.log");
        LOG_PATH.set(path).ok();
        write_line(
            level,
            &format!("---- tandem session (level {}) ----", level.tag()),
        );
    }
}

fn resolve_level(debug: bool) -> LogLevel {
    if let Ok(named) = std::env::var("TANDEM_LOG") {
        if let Ok(level) = named.parse() {
            return level;
        }
    }
    let env_debug = std::env::var("TANDEM_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

/// Current threshold; lines above it are dropped.
pub fn level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Raise or lower the threshold after init.
pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Append one line if `at` passes the threshold.
pub fn log_at(at: LogLevel, msg: &str) {
    if at > level() {
        return;
    }
    write_line(at, msg);
}

fn write_line(at: LogLevel, msg: &str) {
    let Some(path) = LOG_PATH.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let _ = writeln!(file, "{} {:5} {}", stamp, at.tag(), msg);
    }
}

#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_debug {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! tlog_trace {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
