//! Firmware volume, FFS file, and section layouts.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;
use scroll::{Pread, Pwrite, SizeWith};

/// Well-known file system and section GUIDs.
pub mod guid {
    use r_efi::efi;

    /// `EFI_FIRMWARE_FILE_SYSTEM2_GUID`
    pub const EFI_FIRMWARE_FILE_SYSTEM2_GUID: efi::Guid =
        efi::Guid::from_fields(0x8c8ce578, 0x8a3d, 0x4f1c, 0x99, 0x35, &[0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3]);

    /// `EFI_FIRMWARE_FILE_SYSTEM3_GUID`: adds large file support.
    pub const EFI_FIRMWARE_FILE_SYSTEM3_GUID: efi::Guid =
        efi::Guid::from_fields(0x5473c07a, 0x3dcb, 0x4dca, 0xbd, 0x6f, &[0x1e, 0x96, 0x89, 0xe7, 0x34, 0x9a]);

    /// The volume top file. Nothing is enumerated after it.
    pub const EFI_FFS_VOLUME_TOP_FILE_GUID: efi::Guid =
        efi::Guid::from_fields(0x1ba0062e, 0xc779, 0x4582, 0x85, 0x66, &[0x33, 0x6a, 0xe8, 0xf7, 0x8f, 0x09]);

    pub const LZMA_SECTION: efi::Guid =
        efi::Guid::from_fields(0xee4e5898, 0x3914, 0x4259, 0x9d, 0x6e, &[0xdc, 0x7b, 0xd7, 0x94, 0x03, 0xcf]);

    pub const BROTLI_SECTION: efi::Guid =
        efi::Guid::from_fields(0x3d532050, 0x5cda, 0x4fd0, 0x87, 0x9e, &[0x0f, 0x7f, 0x63, 0x0d, 0x5a, 0xfb]);

    pub const CRC32_SECTION: efi::Guid =
        efi::Guid::from_fields(0xfc1bcdb0, 0x7d31, 0x49aa, 0x93, 0x6a, &[0xa4, 0x60, 0x0d, 0x9d, 0xd0, 0x83]);

    pub const TIANO_SECTION: efi::Guid =
        efi::Guid::from_fields(0xa31280ad, 0x481e, 0x41b6, 0x95, 0xe8, &[0x12, 0x7f, 0x4c, 0x98, 0x47, 0x79]);
}

/// Firmware volume header structures.
pub mod fv {
    use super::*;

    pub const SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");
    pub const FFS_REVISION: u8 = 2;
    /// Largest file an FFS2 volume can hold.
    pub const FFS_V2_MAX_FILE_SIZE: usize = 0x1000000;

    /// `EFI_FVB_ATTRIBUTES_2` bits the parser interprets.
    pub mod attributes {
        pub const READ_STATUS: u32 = 0x0000_0004;
        pub const WRITE_STATUS: u32 = 0x0000_0020;
        pub const ERASE_POLARITY: u32 = 0x0000_0800;
        pub const MEMORY_MAPPED: u32 = 0x0000_4000;
    }

    /// `EFI_FIRMWARE_VOLUME_HEADER` without the trailing block map.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct Header {
        pub zero_vector: [u8; 16],
        pub file_system_guid: [u8; 16],
        pub fv_length: u64,
        pub signature: u32,
        pub attributes: u32,
        pub header_length: u16,
        pub checksum: u16,
        pub ext_header_offset: u16,
        pub reserved: u8,
        pub revision: u8,
    }

    impl Header {
        pub const SIZE: usize = 56;

        pub fn file_system_guid(&self) -> efi::Guid {
            efi::Guid::from_bytes(&self.file_system_guid)
        }
    }

    /// One run of equally sized blocks. The map ends with an all-zero entry.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct BlockMapEntry {
        pub num_blocks: u32,
        pub length: u32,
    }

    impl BlockMapEntry {
        pub const SIZE: usize = 8;
    }

    /// `EFI_FIRMWARE_VOLUME_EXT_HEADER`
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct ExtHeader {
        pub fv_name: [u8; 16],
        pub ext_header_size: u32,
    }

    impl ExtHeader {
        pub const SIZE: usize = 20;

        pub fn fv_name(&self) -> efi::Guid {
            efi::Guid::from_bytes(&self.fv_name)
        }
    }
}

/// FFS file header structures.
pub mod file {
    use super::*;

    /// `EFI_FFS_FILE_HEADER`
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct Header {
        pub name: [u8; 16],
        pub integrity_check_header: u8,
        pub integrity_check_file: u8,
        pub file_type: u8,
        pub attributes: u8,
        pub size: [u8; 3],
        pub state: u8,
    }

    impl Header {
        pub const SIZE: usize = 24;
        /// Offset of `integrity_check_file`, excluded from the header checksum.
        pub const FILE_CHECKSUM_OFFSET: usize = 17;
        /// Offset of `state`, excluded from the header checksum.
        pub const STATE_OFFSET: usize = 23;

        pub fn name(&self) -> efi::Guid {
            efi::Guid::from_bytes(&self.name)
        }

        /// The 24-bit size field.
        pub fn size24(&self) -> usize {
            u32::from_le_bytes([self.size[0], self.size[1], self.size[2], 0]) as usize
        }
    }

    /// `EFI_FFS_FILE_HEADER2`: header of a large file.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct Header2 {
        pub header: Header,
        pub extended_size: u64,
    }

    impl Header2 {
        pub const SIZE: usize = 32;
    }

    /// `EFI_FV_FILETYPE_*`
    pub mod r#type {
        pub const ALL: u8 = 0x00;
        pub const RAW: u8 = 0x01;
        pub const FREEFORM: u8 = 0x02;
        pub const SECURITY_CORE: u8 = 0x03;
        pub const PEI_CORE: u8 = 0x04;
        pub const DXE_CORE: u8 = 0x05;
        pub const PEIM: u8 = 0x06;
        pub const DRIVER: u8 = 0x07;
        pub const COMBINED_PEIM_DRIVER: u8 = 0x08;
        pub const APPLICATION: u8 = 0x09;
        pub const MM: u8 = 0x0A;
        pub const FIRMWARE_VOLUME_IMAGE: u8 = 0x0B;
        pub const COMBINED_MM_DXE: u8 = 0x0C;
        pub const MM_CORE: u8 = 0x0D;
        pub const MM_STANDALONE: u8 = 0x0E;
        pub const MM_CORE_STANDALONE: u8 = 0x0F;
        pub const FFS_PAD: u8 = 0xF0;
    }

    /// `FFS_ATTRIB_*`
    pub mod attributes {
        pub const LARGE_FILE: u8 = 0x01;
        pub const DATA_ALIGNMENT_2: u8 = 0x02;
        pub const FIXED: u8 = 0x04;
        pub const DATA_ALIGNMENT: u8 = 0x38;
        pub const CHECKSUM: u8 = 0x40;
    }

    /// `EFI_FILE_*` state bits, as they read with an erase polarity of zero.
    pub mod state {
        pub const HEADER_CONSTRUCTION: u8 = 0x01;
        pub const HEADER_VALID: u8 = 0x02;
        pub const DATA_VALID: u8 = 0x04;
        pub const MARKED_FOR_UPDATE: u8 = 0x08;
        pub const DELETED: u8 = 0x10;
        pub const HEADER_INVALID: u8 = 0x20;
    }

    /// The file checksum value used when `CHECKSUM` is not set.
    pub const FFS_FIXED_CHECKSUM: u8 = 0xAA;
}

/// Section header structures.
pub mod section {
    use super::*;

    /// Sections at or above this size use the extended header.
    pub const MAX_STANDARD_SECTION_SIZE: usize = 0x1000000;

    /// `EFI_SECTION_*`
    pub mod r#type {
        pub const ALL: u8 = 0x00;
        pub const COMPRESSION: u8 = 0x01;
        pub const GUID_DEFINED: u8 = 0x02;
        pub const DISPOSABLE: u8 = 0x03;
        pub const PE32: u8 = 0x10;
        pub const PIC: u8 = 0x11;
        pub const TE: u8 = 0x12;
        pub const DXE_DEPEX: u8 = 0x13;
        pub const VERSION: u8 = 0x14;
        pub const USER_INTERFACE: u8 = 0x15;
        pub const COMPATIBILITY16: u8 = 0x16;
        pub const FIRMWARE_VOLUME_IMAGE: u8 = 0x17;
        pub const FREEFORM_SUBTYPE_GUID: u8 = 0x18;
        pub const RAW: u8 = 0x19;
        pub const PEI_DEPEX: u8 = 0x1B;
        pub const MM_DEPEX: u8 = 0x1C;
    }

    /// `EFI_COMMON_SECTION_HEADER`
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct Header {
        pub size: [u8; 3],
        pub section_type: u8,
    }

    impl Header {
        pub const SIZE: usize = 4;

        /// True when the 24-bit size reads 0xFFFFFF and an extended size follows.
        pub fn is_extended(&self) -> bool {
            self.size == [0xff; 3]
        }

        pub fn size24(&self) -> usize {
            u32::from_le_bytes([self.size[0], self.size[1], self.size[2], 0]) as usize
        }
    }

    /// `EFI_COMMON_SECTION_HEADER2`
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct ExtendedHeader {
        pub header: Header,
        pub extended_size: u32,
    }

    impl ExtendedHeader {
        pub const SIZE: usize = 8;
    }

    /// Compression-section fields following the common header (packed, 5 bytes).
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct Compression {
        pub uncompressed_length: u32,
        pub compression_type: u8,
    }

    impl Compression {
        pub const SIZE: usize = 5;
        pub const NOT_COMPRESSED: u8 = 0x00;
        pub const STANDARD_COMPRESSION: u8 = 0x01;
    }

    /// GUID-defined section fields following the common header.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct GuidDefined {
        pub section_definition_guid: [u8; 16],
        /// Offset of the payload from the start of the section.
        pub data_offset: u16,
        pub attributes: u16,
    }

    impl GuidDefined {
        pub const SIZE: usize = 20;
        pub const PROCESSING_REQUIRED: u16 = 0x01;
        pub const AUTH_STATUS_VALID: u16 = 0x02;

        pub fn section_definition_guid(&self) -> efi::Guid {
            efi::Guid::from_bytes(&self.section_definition_guid)
        }
    }

    /// Version section fields following the common header.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct Version {
        pub build_number: u16,
    }

    impl Version {
        pub const SIZE: usize = 2;
    }

    /// Freeform subtype section fields following the common header.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
    pub struct FreeformSubtypeGuid {
        pub sub_type_guid: [u8; 16],
    }

    impl FreeformSubtypeGuid {
        pub const SIZE: usize = 16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scroll::{ctx::SizeWith, LE};

    #[test]
    fn layout_sizes_match_wire_format() {
        assert_eq!(fv::Header::size_with(&LE), fv::Header::SIZE);
        assert_eq!(fv::BlockMapEntry::size_with(&LE), fv::BlockMapEntry::SIZE);
        assert_eq!(fv::ExtHeader::size_with(&LE), fv::ExtHeader::SIZE);
        assert_eq!(file::Header::size_with(&LE), file::Header::SIZE);
        assert_eq!(file::Header2::size_with(&LE), file::Header2::SIZE);
        assert_eq!(section::Header::size_with(&LE), section::Header::SIZE);
        assert_eq!(section::ExtendedHeader::size_with(&LE), section::ExtendedHeader::SIZE);
        assert_eq!(section::Compression::size_with(&LE), section::Compression::SIZE);
        assert_eq!(section::GuidDefined::size_with(&LE), section::GuidDefined::SIZE);
        assert_eq!(section::Version::size_with(&LE), section::Version::SIZE);
        assert_eq!(section::FreeformSubtypeGuid::size_with(&LE), section::FreeformSubtypeGuid::SIZE);
    }

    #[test]
    fn file_header_reads_little_endian_size() {
        let mut bytes = [0u8; file::Header::SIZE];
        bytes[20..23].copy_from_slice(&[0x34, 0x12, 0x01]);
        let header: file::Header = bytes.pread_with(0, LE).unwrap();
        assert_eq!(header.size24(), 0x011234);
        assert_eq!(fv::SIGNATURE, 0x4856465F);
    }
}
