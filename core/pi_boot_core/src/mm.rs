//! MM services: the handler registry and synchronous communication.
//!
//! A communicate buffer starts with an [`MmCommunicateHeader`] naming the handler and the length of the message
//! that follows it. The handler runs on the BSP while every other processor is held in the MM rendezvous, and
//! writes its response over the message. The header's length is updated to the response length.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{sync::Arc, vec::Vec};
use core::fmt;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use pi_internal_mp::MmRendezvous;
use pi_sdk::{error::EfiError, guid_fmt};
use r_efi::efi;
use scroll::{Pread, Pwrite, SizeWith, LE};

use crate::{capabilities::MmExecutor, config::CoreConfig, error::PhaseError};

/// `EFI_MM_COMMUNICATE_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct MmCommunicateHeader {
    pub header_guid: [u8; 16],
    pub message_length: u64,
}

impl MmCommunicateHeader {
    pub const SIZE: usize = 24;

    pub fn new(guid: &efi::Guid, message_length: usize) -> Self {
        Self { header_guid: *guid.as_bytes(), message_length: message_length as u64 }
    }

    pub fn header_guid(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.header_guid)
    }
}

/// A root MMI handler.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait MmHandler {
    /// Handle the `message_length` bytes at the front of `message`, which may be overwritten up to its full length.
    /// Returns the length of the response.
    fn handle(&self, message: &mut [u8], message_length: usize) -> Result<usize, EfiError>;
}

pub struct MmServices {
    handlers: Vec<(efi::Guid, Arc<dyn MmHandler>)>,
    locked: bool,
    rendezvous: Arc<MmRendezvous>,
    executor: Arc<dyn MmExecutor>,
}

impl MmServices {
    /// A registry for `config.cpu_count` processors that enters MM through `executor`.
    pub fn new(config: &CoreConfig, executor: Arc<dyn MmExecutor>) -> Result<Self, EfiError> {
        let rendezvous = MmRendezvous::new(config.cpu_count, config.mm_sync_mode, config.mm_timeout_spins)?;
        Ok(Self { handlers: Vec::new(), locked: false, rendezvous: Arc::new(rendezvous), executor })
    }

    /// The rendezvous the application processors check in to when the SMI reaches them.
    pub fn rendezvous(&self) -> Arc<MmRendezvous> {
        Arc::clone(&self.rendezvous)
    }

    /// Register the handler for messages sent to `guid`.
    pub fn register_handler(&mut self, guid: efi::Guid, handler: Arc<dyn MmHandler>) -> Result<(), EfiError> {
        if self.locked {
            log::warn!(target: "pi_mm", "handler registration for {} after ready-to-lock", guid_fmt!(guid));
            return Err(PhaseError::RegistryLocked.into());
        }
        if self.handlers.iter().any(|(registered, _)| *registered == guid) {
            return Err(EfiError::InvalidParameter);
        }
        self.handlers.push((guid, handler));
        log::debug!(target: "pi_mm", "registered MM handler {}", guid_fmt!(guid));
        Ok(())
    }

    pub fn unregister_handler(&mut self, guid: &efi::Guid) -> Result<(), EfiError> {
        if self.locked {
            return Err(PhaseError::RegistryLocked.into());
        }
        let index = self.handlers.iter().position(|(registered, _)| registered == guid).ok_or(EfiError::NotFound)?;
        self.handlers.remove(index);
        Ok(())
    }

    /// Freeze the registry. Called when SMM ready-to-lock is installed.
    pub fn lock(&mut self) {
        if !self.locked {
            log::info!(target: "pi_mm", "MM handler registry locked with {} handlers", self.handlers.len());
        }
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Deliver `buffer` to its handler inside MM and leave the response in place.
    pub fn communicate(&self, buffer: &mut [u8]) -> Result<(), EfiError> {
        let header: MmCommunicateHeader = buffer.pread_with(0, LE).map_err(|_| EfiError::BadBufferSize)?;
        let capacity = buffer.len() - MmCommunicateHeader::SIZE;
        let message_length = usize::try_from(header.message_length).map_err(|_| EfiError::BadBufferSize)?;
        if message_length > capacity {
            log::error!(target: "pi_mm", "message length {message_length:#x} exceeds buffer capacity {capacity:#x}");
            return Err(EfiError::BadBufferSize);
        }

        let guid = header.header_guid();
        let handler = self
            .handlers
            .iter()
            .find(|(registered, _)| *registered == guid)
            .map(|(_, handler)| Arc::clone(handler))
            .ok_or_else(|| {
                log::warn!(target: "pi_mm", "no MM handler for {}", guid_fmt!(guid));
                EfiError::NotFound
            })?;

        self.executor.raise_smi()?;
        let message = &mut buffer[MmCommunicateHeader::SIZE..];
        let response_length = self.rendezvous.bsp_enter(0, |participants| {
            log::trace!(target: "pi_mm", "handling {} with processors {participants:?}", guid_fmt!(guid));
            handler.handle(message, message_length)
        })??;
        if response_length > capacity {
            log::error!(target: "pi_mm", "handler {} overran the buffer", guid_fmt!(guid));
            return Err(EfiError::BadBufferSize);
        }

        buffer
            .pwrite_with(MmCommunicateHeader::new(&guid, response_length), 0, LE)
            .map_err(|_| EfiError::BadBufferSize)?;
        Ok(())
    }
}

impl fmt::Debug for MmServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmServices")
            .field("handlers", &self.handlers.iter().map(|(guid, _)| guid_fmt!(guid)).collect::<Vec<_>>())
            .field("locked", &self.locked)
            .field("cpu_count", &self.rendezvous.cpu_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MockMmExecutor, NullMmExecutor};
    use scroll::ctx::SizeWith;
    use std::vec;

    const HANDLER: efi::Guid = efi::Guid::from_bytes(&[0x5a; 16]);

    fn services() -> MmServices {
        MmServices::new(&CoreConfig::default().with_mm_timeout_spins(1000), Arc::new(NullMmExecutor)).unwrap()
    }

    fn request(guid: &efi::Guid, message: &[u8], capacity: usize) -> Vec<u8> {
        let mut buffer = vec![0u8; MmCommunicateHeader::SIZE + capacity];
        buffer.pwrite_with(MmCommunicateHeader::new(guid, message.len()), 0, LE).unwrap();
        buffer[MmCommunicateHeader::SIZE..][..message.len()].copy_from_slice(message);
        buffer
    }

    #[test]
    fn header_layout_matches_wire_format() {
        assert_eq!(MmCommunicateHeader::size_with(&LE), MmCommunicateHeader::SIZE);
    }

    #[test]
    fn handler_response_is_written_in_place() {
        let mut handler = MockMmHandler::new();
        handler.expect_handle().times(1).returning(|message, length| {
            assert_eq!(length, 3);
            assert_eq!(&message[..3], b"abc");
            message[..5].copy_from_slice(b"HELLO");
            Ok(5)
        });
        let mut mm = services();
        mm.register_handler(HANDLER, Arc::new(handler)).unwrap();

        let mut buffer = request(&HANDLER, b"abc", 16);
        mm.communicate(&mut buffer).unwrap();
        let header: MmCommunicateHeader = buffer.pread_with(0, LE).unwrap();
        assert_eq!(header.message_length, 5);
        assert_eq!(&buffer[MmCommunicateHeader::SIZE..][..5], b"HELLO");
    }

    #[test]
    fn malformed_buffers_are_rejected() {
        let mm = services();
        assert_eq!(mm.communicate(&mut [0u8; 8]), Err(EfiError::BadBufferSize));

        let mut buffer = request(&HANDLER, &[0; 8], 8);
        buffer[16] = 9;
        assert_eq!(mm.communicate(&mut buffer), Err(EfiError::BadBufferSize));

        let mut buffer = request(&HANDLER, &[0; 4], 8);
        assert_eq!(mm.communicate(&mut buffer), Err(EfiError::NotFound));
    }

    #[test]
    fn smi_failure_skips_the_handler() {
        let mut executor = MockMmExecutor::new();
        executor.expect_raise_smi().times(1).returning(|| Err(EfiError::DeviceError));
        let mut handler = MockMmHandler::new();
        handler.expect_handle().never();

        let mut mm = MmServices::new(&CoreConfig::default(), Arc::new(executor)).unwrap();
        mm.register_handler(HANDLER, Arc::new(handler)).unwrap();
        let mut buffer = request(&HANDLER, &[1], 4);
        assert_eq!(mm.communicate(&mut buffer), Err(EfiError::DeviceError));
    }

    #[test]
    fn locked_registry_refuses_changes() {
        let mut mm = services();
        mm.register_handler(HANDLER, Arc::new(MockMmHandler::new())).unwrap();
        assert_eq!(mm.register_handler(HANDLER, Arc::new(MockMmHandler::new())), Err(EfiError::InvalidParameter));
        mm.lock();
        assert!(mm.is_locked());
        assert_eq!(mm.unregister_handler(&HANDLER), Err(EfiError::AccessDenied));
        let other = efi::Guid::from_bytes(&[1; 16]);
        assert_eq!(mm.register_handler(other, Arc::new(MockMmHandler::new())), Err(EfiError::AccessDenied));
    }

    #[test]
    fn handler_errors_propagate() {
        let mut handler = MockMmHandler::new();
        handler.expect_handle().returning(|_, _| Err(EfiError::Unsupported));
        let mut mm = services();
        mm.register_handler(HANDLER, Arc::new(handler)).unwrap();
        let mut buffer = request(&HANDLER, &[], 4);
        assert_eq!(mm.communicate(&mut buffer), Err(EfiError::Unsupported));
        assert!(mm.unregister_handler(&HANDLER).is_ok());
    }
}
