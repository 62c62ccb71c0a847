//! Serial logging for the boot core.
//!
//! Every subsystem logs through the `log` facade with its own target (`pi_hob`, `pi_depex`, `pi_dispatcher`,
//! `pi_phase`, `pi_mm`, `pi_ftw`). [`SerialLogger`] filters per target and writes to any [`SerialIO`] sink.
//!
//! ## Examples
//!
//! ```rust ignore
//! use pi_sdk::log::{Format, SerialLogger};
//! use pi_sdk::serial::Terminal;
//!
//! static LOGGER: SerialLogger<Terminal> = SerialLogger::new(
//!    Format::Standard,
//!    &[("pi_depex", log::LevelFilter::Warn)],
//!    log::LevelFilter::Trace,
//!    Terminal {},
//! );
//! ```
//!
//! [`SerialIO`]: crate::serial::SerialIO
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

mod serial_logger;
pub use serial_logger::Logger as SerialLogger;

/// Format of an emitted log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub enum Format {
    /// Standard text format containing the log level and message.
    Standard,
    /// JSON blob containing the log level and message.
    Json,
    /// Verbose JSON blob containing the log level, message, target, and file path and line number.
    VerboseJson,
}

impl Format {
    /// Formats the log message and writes it to the target.
    ///
    /// May run before the heap exists, so nothing here allocates.
    pub fn write<T: core::fmt::Write>(&self, target: &mut T, record: &log::Record) -> core::fmt::Result {
        match self {
            Format::Standard if record.level() == log::Level::Trace => writeln!(
                target,
                "TRACE - {}:{}: {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            ),
            Format::Standard => writeln!(target, "{} - [{}] {}", record.level(), record.target(), record.args()),
            Format::Json => {
                writeln!(target, "{{\"level\": \"{}\", \"message\": \"{}\"}}", record.level(), record.args())
            }
            Format::VerboseJson => writeln!(
                target,
                "{{\"level\": \"{}\", \"target\": \"{}\", \"message\": \"{}\", \"file\": \"{}\", \"line\": \"{}\"}}",
                record.level(),
                record.target(),
                record.args(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0)
            ),
        }
    }
}
