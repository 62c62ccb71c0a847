//! GUID helpers.
//!
//! [`efi::Guid`] has no ordering and prints as raw fields; [`OrdGuid`] lets it key a `BTreeMap` and [`GuidFmt`]
//! displays it in registry format (`8C8CE578-8A3D-4F1C-9935-896185C32DD3`).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::{cmp::Ordering, fmt};
use r_efi::efi;

/// Wraps a GUID for display in registry format.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GuidFmt(pub efi::Guid);

impl fmt::Display for GuidFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (time_low, time_mid, time_hi, clk_hi, clk_low, node) = self.0.as_fields();
        write!(f, "{time_low:08X}-{time_mid:04X}-{time_hi:04X}-{clk_hi:02X}{clk_low:02X}-")?;
        for byte in node {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for GuidFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Formats a GUID (or a reference to one) for logging.
#[macro_export]
macro_rules! guid_fmt {
    ($guid:expr) => {
        $crate::guid::GuidFmt(*::core::borrow::Borrow::<$crate::__r_efi::efi::Guid>::borrow(&$guid))
    };
}

/// A GUID with a total order over its byte representation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OrdGuid(pub efi::Guid);

impl PartialOrd for OrdGuid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdGuid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl From<efi::Guid> for OrdGuid {
    fn from(guid: efi::Guid) -> Self {
        OrdGuid(guid)
    }
}

/// Builds a GUID from its 16-byte on-disk representation.
pub fn guid_from_bytes(bytes: &[u8; 16]) -> efi::Guid {
    efi::Guid::from_bytes(bytes)
}
