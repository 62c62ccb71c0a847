//! The flat EFI status taxonomy shared by every layer of the boot core.
//!
//! Every crate in the workspace reports failures as an [`EfiError`] (or a crate-local error that converts into
//! one). Conversion to and from [`r_efi::efi::Status`] is lossless: codes this enum does not name are carried in
//! [`EfiError::Unknown`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;
use r_efi::efi;

/// A specialized [`Result`](core::result::Result) type for boot core operations.
pub type Result<T> = core::result::Result<T, EfiError>;

macro_rules! efi_errors {
    ($($(#[$doc:meta])* $variant:ident => $status:ident,)*) => {
        /// EDK II status code equivalent as a Rust error enum.
        #[derive(Debug, PartialEq, Eq, Clone, Copy)]
        pub enum EfiError {
            $($(#[$doc])* $variant,)*
            /// A status code with no dedicated variant.
            Unknown(efi::Status),
        }

        impl EfiError {
            /// Converts an `efi::Status` to a `Result`.
            ///
            /// `SUCCESS` and warning codes map to `Ok(())`; error codes map to the corresponding variant.
            pub fn status_to_result(status: efi::Status) -> Result<()> {
                if !status.is_error() {
                    return Ok(());
                }
                match status {
                    $(efi::Status::$status => Err(EfiError::$variant),)*
                    _ => Err(EfiError::Unknown(status)),
                }
            }
        }

        impl From<EfiError> for efi::Status {
            fn from(e: EfiError) -> efi::Status {
                match e {
                    $(EfiError::$variant => efi::Status::$status,)*
                    EfiError::Unknown(status) => status,
                }
            }
        }
    };
}

efi_errors! {
    /// The image failed to load.
    LoadError => LOAD_ERROR,
    /// The parameter was incorrect.
    InvalidParameter => INVALID_PARAMETER,
    /// The operation is not supported.
    Unsupported => UNSUPPORTED,
    /// The buffer was not the proper size for the request.
    BadBufferSize => BAD_BUFFER_SIZE,
    /// The buffer was not large enough to hold the requested data.
    BufferTooSmall => BUFFER_TOO_SMALL,
    /// There is no data pending upon return.
    NotReady => NOT_READY,
    /// The physical device reported an error while attempting the operation.
    DeviceError => DEVICE_ERROR,
    /// The device can not be written to.
    WriteProtected => WRITE_PROTECTED,
    /// A resource has run out.
    OutOfResources => OUT_OF_RESOURCES,
    /// An inconsistency was detected on the firmware volume or store.
    VolumeCorrupted => VOLUME_CORRUPTED,
    /// There is no more space on the volume or store.
    VolumeFull => VOLUME_FULL,
    /// The item was not found.
    NotFound => NOT_FOUND,
    /// Access was denied.
    AccessDenied => ACCESS_DENIED,
    /// A timeout time expired.
    Timeout => TIMEOUT,
    /// The protocol has not been started.
    NotStarted => NOT_STARTED,
    /// The protocol has already been started.
    AlreadyStarted => ALREADY_STARTED,
    /// The operation was aborted.
    Aborted => ABORTED,
    /// An internal version was incompatible with the one requested by the caller.
    IncompatibleVersion => INCOMPATIBLE_VERSION,
    /// The function was not performed due to a security violation.
    SecurityViolation => SECURITY_VIOLATION,
    /// A CRC error was detected.
    CrcError => CRC_ERROR,
    /// The security status of the data is unknown or compromised.
    CompromisedData => COMPROMISED_DATA,
}

impl From<efi::Status> for EfiError {
    /// Converts an error status. A non-error status has no error meaning and maps to `Unknown`.
    fn from(status: efi::Status) -> EfiError {
        match EfiError::status_to_result(status) {
            Err(err) => err,
            Ok(()) => EfiError::Unknown(status),
        }
    }
}

impl fmt::Display for EfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EfiError::Unknown(status) => write!(f, "Unknown({:#x})", status.as_usize()),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl core::error::Error for EfiError {}
