//! Kernel logger
//!
//! Implements the `log` facade. Every record is formatted once as
//! `[LEVEL] target: message`, captured into the kernel log ring buffer and,
//! once the host has installed one, forwarded to an output sink (the
//! simulated serial port).

use alloc::format;
use conquer_once::spin::OnceCell;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::log_buffer;

/// Output sink for formatted log lines, installed at most once.
static LOG_SINK: OnceCell<fn(&str)> = OnceCell::uninit();

pub struct KernelLogger;

pub static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!("[{:>5}] {}: {}\n", record.level(), record.target(), record.args());
        log_buffer::capture(&line);
        if let Some(sink) = LOG_SINK.get() {
            sink(&line);
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger and set the maximum level.
///
/// Safe to call more than once; later calls only adjust the level.
pub fn init(level: LevelFilter) {
    let installed: Result<(), SetLoggerError> = log::set_logger(&LOGGER);
    if installed.is_err() {
        log::trace!("logger already installed, adjusting level only");
    }
    log::set_max_level(level);
}

/// Install the output sink. Only the first call takes effect.
pub fn set_sink(sink: fn(&str)) -> bool {
    LOG_SINK.try_init_once(|| sink).is_ok()
}
