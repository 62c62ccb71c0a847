//! Interface and event-group GUIDs the boot core itself produces or waits on.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;

/// `gEfiPeiMemoryDiscoveredPpiGuid`
pub const MEMORY_DISCOVERED_PPI: efi::Guid =
    efi::Guid::from_fields(0xf894643d, 0xc449, 0x42d1, 0x8e, 0xa8, &[0x85, 0xbd, 0xd8, 0xc6, 0x5b, 0xde]);

/// `gEfiEndOfPeiSignalPpiGuid`
pub const END_OF_PEI_PPI: efi::Guid =
    efi::Guid::from_fields(0x605ea650, 0xc65c, 0x42e1, 0xba, 0x80, &[0x91, 0xa5, 0x2a, 0xb6, 0x18, 0xc6]);

/// `gEfiEndOfDxeEventGroupGuid`
pub const END_OF_DXE_EVENT_GROUP: efi::Guid =
    efi::Guid::from_fields(0x02ce967a, 0xdd7e, 0x4ffc, 0x9e, 0xe7, &[0x81, 0x0c, 0xf0, 0x47, 0x08, 0x80]);

/// `gEfiDxeSmmReadyToLockProtocolGuid`
pub const SMM_READY_TO_LOCK_PROTOCOL: efi::Guid =
    efi::Guid::from_fields(0x60ff8964, 0xe906, 0x41d0, 0xaf, 0xed, &[0xf2, 0x41, 0xe9, 0x74, 0xe0, 0x8e]);

/// `gEfiEventReadyToBootGuid`
pub const READY_TO_BOOT_EVENT_GROUP: efi::Guid =
    efi::Guid::from_fields(0x7ce88fb3, 0x4bd7, 0x4679, 0x87, 0xa8, &[0xa8, 0xd8, 0xde, 0xe5, 0x0d, 0x2b]);

/// `gEfiMmCommunication2ProtocolGuid`
pub const MM_COMMUNICATION2_PROTOCOL: efi::Guid =
    efi::Guid::from_fields(0x378daedc, 0xf06b, 0x4446, 0x83, 0x14, &[0x40, 0xab, 0x93, 0x3c, 0x87, 0xa3]);

