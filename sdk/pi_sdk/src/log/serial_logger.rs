//! A serial logger implementation for the `log` crate.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use super::Format;
use crate::serial::SerialIO;

/// Writes log records straight to a serial sink.
///
/// A record passes when its level is within the filter of the longest matching target prefix, or within
/// `max_level` when no prefix matches.
pub struct Logger<'a, S>
where
    S: SerialIO + Send,
{
    serial_port: S,
    target_filters: &'a [(&'a str, log::LevelFilter)],
    max_level: log::LevelFilter,
    format: Format,
}

impl<'a, S> Logger<'a, S>
where
    S: SerialIO + Send,
{
    pub const fn new(
        format: Format,
        target_filters: &'a [(&'a str, log::LevelFilter)],
        max_level: log::LevelFilter,
        serial_port: S,
    ) -> Self {
        Self { serial_port, target_filters, max_level, format }
    }

    /// The sink this logger writes to.
    pub fn serial_port(&self) -> &S {
        &self.serial_port
    }

    fn level_for(&self, target: &str) -> log::LevelFilter {
        self.target_filters
            .iter()
            .filter(|(name, _)| target.starts_with(name))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.max_level)
    }
}

impl<S> log::Log for Logger<'_, S>
where
    S: SerialIO + Send,
{
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level().to_level_filter() <= self.level_for(metadata.target())
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let mut writer = LogWriter { serial_port: &self.serial_port };
            // A serial sink cannot report failure; dropping the line is all there is to do.
            let _ = self.format.write(&mut writer, record);
        }
    }

    fn flush(&self) {}
}

/// A wrapper for handling log writes to a serial IO object.
struct LogWriter<'a, S>
where
    S: SerialIO + Send,
{
    serial_port: &'a S,
}

impl<S> core::fmt::Write for LogWriter<'_, S>
where
    S: SerialIO + Send,
{
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.serial_port.write(s.as_bytes());
        Ok(())
    }
}
