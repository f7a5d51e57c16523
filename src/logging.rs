//! Leveled diagnostics for the patching pipeline
//!
//! The allocators in this crate do not report through this module; they return
//! results and leave the verdict to their caller. The pipeline that drives
//! them owns a [`Logger`] whose [`LogFlags`] mask decides which of the four
//! levels reach the sink.

use bitflags::bitflags;
use core::fmt::{self, Arguments};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// The set of enabled log levels.
    pub struct LogFlags: u32 {
        /// Failures that abort an operation.
        const ERROR = 0x1;
        /// Suspicious but recoverable conditions.
        const WARNING = 0x2;
        /// Progress of patch operations.
        const INFO = 0x4;
        /// Verbose per-symbol and per-page details.
        const DETAIL = 0x8;
    }
}

impl Default for LogFlags {
    fn default() -> Self {
        LogFlags::ERROR | LogFlags::WARNING | LogFlags::INFO
    }
}

/// Severity of one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    /// An operation failed.
    Error,
    /// Something unexpected that the operation recovered from.
    Warning,
    /// Progress worth reporting by default.
    Info,
    /// Verbose tracing, hidden by default.
    Detail,
}

impl LogLevel {
    /// The flag that enables this level.
    #[inline]
    pub const fn flag(self) -> LogFlags {
        match self {
            LogLevel::Error => LogFlags::ERROR,
            LogLevel::Warning => LogFlags::WARNING,
            LogLevel::Info => LogFlags::INFO,
            LogLevel::Detail => LogFlags::DETAIL,
        }
    }

    /// The prefix written in front of each message.
    #[inline]
    pub const fn prefix(self) -> &'static str {
        match self {
            LogLevel::Error => "error: ",
            LogLevel::Warning => "warning: ",
            LogLevel::Info => "info: ",
            LogLevel::Detail => "detail: ",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches(": "))
    }
}

/// Destination of enabled messages.
///
/// Any `Fn(LogLevel, Arguments)` closure is a sink:
/// ```rust
/// use hotpatch_core::logging::{LogFlags, LogLevel, Logger};
///
/// let logger = Logger::new(LogFlags::all(), |level: LogLevel, args: core::fmt::Arguments| {
///     println!("{}{}", level.prefix(), args);
/// });
/// logger.info(format_args!("patched {} functions", 3));
/// ```
pub trait LogSink {
    /// Writes one message. Filtering has already happened.
    fn write(&self, level: LogLevel, args: Arguments<'_>);
}

impl<F: ?Sized> LogSink for F
where
    F: Fn(LogLevel, Arguments<'_>),
{
    fn write(&self, level: LogLevel, args: Arguments<'_>) {
        self(level, args)
    }
}

/// Forwards messages to the `log` facade.
///
/// `Detail` maps to `log::Level::Debug`. The level prefix is left to the
/// installed logger.
#[cfg(feature = "log")]
#[derive(Clone, Copy, Debug, Default)]
pub struct LogCrateSink;

#[cfg(feature = "log")]
impl LogSink for LogCrateSink {
    fn write(&self, level: LogLevel, args: Arguments<'_>) {
        let level = match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Detail => log::Level::Debug,
        };
        log::log!(target: "hotpatch_core", level, "{}", args);
    }
}

/// A sink together with the mask of enabled levels.
pub struct Logger<S> {
    flags: LogFlags,
    sink: S,
}

impl<S: LogSink> Logger<S> {
    /// Creates a logger writing the levels in `flags` to `sink`.
    pub const fn new(flags: LogFlags, sink: S) -> Self {
        Self { flags, sink }
    }

    /// Gets the enabled levels.
    #[inline]
    pub fn flags(&self) -> LogFlags {
        self.flags
    }

    /// Replaces the enabled levels.
    #[inline]
    pub fn set_flags(&mut self, flags: LogFlags) {
        self.flags = flags;
    }

    /// Whether messages of `level` reach the sink.
    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.flags.contains(level.flag())
    }

    /// Writes a message if its level is enabled.
    #[inline]
    pub fn log(&self, level: LogLevel, args: Arguments<'_>) {
        if self.enabled(level) {
            self.sink.write(level, args);
        }
    }

    /// Logs `args` at [`LogLevel::Error`].
    #[inline]
    pub fn error(&self, args: Arguments<'_>) {
        self.log(LogLevel::Error, args)
    }

    /// Logs `args` at [`LogLevel::Warning`].
    #[inline]
    pub fn warning(&self, args: Arguments<'_>) {
        self.log(LogLevel::Warning, args)
    }

    /// Logs `args` at [`LogLevel::Info`].
    #[inline]
    pub fn info(&self, args: Arguments<'_>) {
        self.log(LogLevel::Info, args)
    }

    /// Logs `args` at [`LogLevel::Detail`].
    #[inline]
    pub fn detail(&self, args: Arguments<'_>) {
        self.log(LogLevel::Detail, args)
    }

    /// Consumes the logger and returns its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}
