//! Serial sinks for the [`SerialLogger`](crate::log::SerialLogger).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{string::String, vec::Vec};

/// A Trait for serial IO access.
pub trait SerialIO: Sync {
    /// Initialize the serial port.
    fn init(&self);
    /// Write a buffer to the serial port.
    fn write(&self, buffer: &[u8]);
    /// Read a byte from the serial port, blocking until a byte is available.
    fn read(&self) -> u8;
    /// Try to read a byte from the serial port, returning `None` if no byte is available.
    fn try_read(&self) -> Option<u8>;
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSerial;

impl SerialIO for NullSerial {
    fn init(&self) {}

    fn write(&self, _buffer: &[u8]) {}

    fn read(&self) -> u8 {
        0
    }

    fn try_read(&self) -> Option<u8> {
        None
    }
}

/// A sink that captures output in memory.
#[derive(Default)]
pub struct BufferSerial {
    buffer: spin::Mutex<Vec<u8>>,
}

impl BufferSerial {
    pub const fn new() -> Self {
        Self { buffer: spin::Mutex::new(Vec::new()) }
    }

    /// Returns a copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl SerialIO for BufferSerial {
    fn init(&self) {}

    fn write(&self, buffer: &[u8]) {
        self.buffer.lock().extend_from_slice(buffer);
    }

    fn read(&self) -> u8 {
        0
    }

    fn try_read(&self) -> Option<u8> {
        None
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        mod std;
        pub use self::std::Terminal;
    }
}
