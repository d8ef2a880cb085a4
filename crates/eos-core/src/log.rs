//! Log sink plumbing.
//!
//! The library never performs I/O itself: messages are handed to a caller
//! installed callback. Formatting runs through a fixed-size buffer so that
//! steady-state logging never touches the heap; a message that does not fit
//! is replaced by an overflow notice rather than truncated silently.

use core::fmt::{self, Write};

/// Maximum formatted message length, including no terminator.
pub const MAX_LOG_MSG_SIZE: usize = 1000;

/// Message severity, as seen by the installed sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// Machine-scrapable metric lines (timings, memory figures).
    KeyValue,
}

/// Caller-installed log callback.
pub type LogSink = Box<dyn FnMut(LogLevel, &str) + Send>;

/// Owns the optional sink; messages are dropped when none is installed.
pub struct Logger {
    sink: Option<LogSink>,
}

impl Logger {
    pub fn new(sink: Option<LogSink>) -> Self {
        Self { sink }
    }

    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Deliver a preformatted message.
    pub fn log(&mut self, level: LogLevel, message: &str) {
        if let Some(sink) = self.sink.as_mut() {
            sink(level, message);
        }
    }

    /// Format into the fixed buffer and deliver.
    pub fn logf(&mut self, level: LogLevel, args: fmt::Arguments<'_>) {
        let mut buf = MsgBuf::new();
        if buf.write_fmt(args).is_err() || buf.truncated {
            self.log(LogLevel::Error, "Log message too large.");
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink(level, buf.as_str());
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Fixed-capacity UTF-8 accumulator for message formatting.
struct MsgBuf {
    buf: [u8; MAX_LOG_MSG_SIZE],
    len: usize,
    truncated: bool,
}

impl MsgBuf {
    fn new() -> Self {
        Self {
            buf: [0; MAX_LOG_MSG_SIZE],
            len: 0,
            truncated: false,
        }
    }

    fn as_str(&self) -> &str {
        // Only whole &str fragments are appended, so the prefix is valid.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl Write for MsgBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.len + bytes.len() > MAX_LOG_MSG_SIZE {
            self.truncated = true;
            return Ok(());
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

macro_rules! log_debug {
    ($log:expr, $($arg:tt)*) => {
        $log.logf($crate::log::LogLevel::Debug, core::format_args!($($arg)*))
    };
}

macro_rules! log_info {
    ($log:expr, $($arg:tt)*) => {
        $log.logf($crate::log::LogLevel::Info, core::format_args!($($arg)*))
    };
}

macro_rules! log_warn {
    ($log:expr, $($arg:tt)*) => {
        $log.logf($crate::log::LogLevel::Warn, core::format_args!($($arg)*))
    };
}

macro_rules! log_error {
    ($log:expr, $($arg:tt)*) => {
        $log.logf($crate::log::LogLevel::Error, core::format_args!($($arg)*))
    };
}

pub(crate) use {log_debug, log_error, log_info, log_warn};
