//! Firmware Volume (FV) parsing, inspection, and composition.
//!
//! - [`VolumeRef`]: a zero-copy, read-only view over a serialized FV backed by a byte slice.
//! - [`Volume`]: an owned builder for assembling FVs from a block map and FFS files.
//!
//! File enumeration interprets each file's state byte with the volume's erase polarity so that a volume left
//! half-written by a power loss still enumerates every file that was completely committed.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::{fmt, iter, slice};

use pi_sdk::{
    base::align_up_usize,
    pi::{
        fw_fs::{
            file,
            fv::{self, BlockMapEntry},
            guid,
        },
        sum16,
    },
};
use r_efi::efi;
use scroll::{Pread, Pwrite, LE};

use crate::{
    file::{data_alignment, File, FileLayout, FileRef, FileState},
    section::{Section, SectionExtractor, SectionHeader},
    FirmwareFileSystemError,
};

/// Zero-copy view over a Firmware Volume backed by a byte slice.
pub struct VolumeRef<'a> {
    data: &'a [u8],
    fv_header: fv::Header,
    ext_header: Option<fv::ExtHeader>,
    block_map: Vec<BlockMapEntry>,
    content_offset: usize,
}

impl<'a> VolumeRef<'a> {
    /// Parse a byte slice as a Firmware Volume and validate its metadata.
    ///
    /// Checks the signature, header length, header checksum, revision, file system GUID, that the declared
    /// length fits inside `buffer`, the extended header bounds, and the block map. Bytes past the declared length
    /// are not part of the volume.
    pub fn new(buffer: &'a [u8]) -> Result<Self, FirmwareFileSystemError> {
        let fv_header: fv::Header = buffer.pread_with(0, LE)?;

        if fv_header.signature != fv::SIGNATURE {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        let header_length = fv_header.header_length as usize;
        if header_length < fv::Header::SIZE || header_length > buffer.len() || header_length & 0x01 != 0 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        if sum16(&buffer[..header_length]) != 0 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        if fv_header.revision < fv::FFS_REVISION {
            Err(FirmwareFileSystemError::Unsupported)?;
        }

        let file_system_guid = fv_header.file_system_guid();
        if file_system_guid != guid::EFI_FIRMWARE_FILE_SYSTEM2_GUID
            && file_system_guid != guid::EFI_FIRMWARE_FILE_SYSTEM3_GUID
        {
            Err(FirmwareFileSystemError::Unsupported)?;
        }

        if fv_header.fv_length < header_length as u64 || fv_header.fv_length > buffer.len() as u64 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }
        let data = &buffer[..fv_header.fv_length as usize];

        let ext_header = match fv_header.ext_header_offset as usize {
            0 => None,
            offset => {
                let ext_header: fv::ExtHeader = data.pread_with(offset, LE)?;
                let size = ext_header.ext_header_size as usize;
                if size < fv::ExtHeader::SIZE || offset + size > data.len() {
                    Err(FirmwareFileSystemError::InvalidHeader)?;
                }
                Some(ext_header)
            }
        };

        let block_map_bytes = &data[fv::Header::SIZE..header_length];
        if block_map_bytes.len() % BlockMapEntry::SIZE != 0 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }
        let mut block_map = block_map_bytes
            .chunks_exact(BlockMapEntry::SIZE)
            .map(|chunk| chunk.pread_with::<BlockMapEntry>(0, LE))
            .collect::<Result<Vec<_>, _>>()?;

        // The map ends with a zero entry and holds at least one real entry, none of them zero.
        if block_map.pop() != Some(BlockMapEntry::default()) {
            Err(FirmwareFileSystemError::InvalidBlockMap)?;
        }
        if block_map.is_empty() || block_map.iter().any(|entry| entry.num_blocks == 0 || entry.length == 0) {
            Err(FirmwareFileSystemError::InvalidBlockMap)?;
        }

        let content_offset = match &ext_header {
            Some(ext_header) => fv_header.ext_header_offset as usize + ext_header.ext_header_size as usize,
            None => header_length,
        };
        // Files start 8-byte aligned relative to the volume base.
        let content_offset = align_up_usize(content_offset, 8).map_err(|_| FirmwareFileSystemError::InvalidHeader)?;

        Ok(Self { data, fv_header, ext_header, block_map, content_offset })
    }

    /// Parse the volume at a physical address.
    ///
    /// ## Safety
    ///
    /// `base_address` must be the start of a firmware volume that stays mapped and unmodified for `'a`.
    pub unsafe fn new_from_address(base_address: u64) -> Result<Self, FirmwareFileSystemError> {
        let header_bytes = unsafe { slice::from_raw_parts(base_address as *const u8, fv::Header::SIZE) };
        let fv_header: fv::Header = header_bytes.pread_with(0, LE)?;
        if fv_header.signature != fv::SIGNATURE {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }
        let length = usize::try_from(fv_header.fv_length).map_err(|_| FirmwareFileSystemError::InvalidHeader)?;
        let buffer = unsafe { slice::from_raw_parts(base_address as *const u8, length) };
        Self::new(buffer)
    }

    /// True when erased flash in this volume reads as ones.
    pub fn erase_polarity(&self) -> bool {
        self.fv_header.attributes & fv::attributes::ERASE_POLARITY != 0
    }

    /// The byte value of erased flash in this volume.
    pub fn erase_byte(&self) -> u8 {
        if self.erase_polarity() { 0xff } else { 0x00 }
    }

    /// The extended header and the vendor bytes following it, if present.
    pub fn ext_header(&self) -> Option<(fv::ExtHeader, &'a [u8])> {
        self.ext_header.map(|ext_header| {
            let start = self.fv_header.ext_header_offset as usize + fv::ExtHeader::SIZE;
            let end = self.fv_header.ext_header_offset as usize + ext_header.ext_header_size as usize;
            (ext_header, &self.data[start..end])
        })
    }

    /// The volume name from the extended header.
    pub fn fv_name(&self) -> Option<efi::Guid> {
        self.ext_header.map(|ext_header| ext_header.fv_name())
    }

    pub fn block_map(&self) -> &[BlockMapEntry] {
        &self.block_map
    }

    /// Resolve a logical block address to `(byte_offset, block_size, remaining_blocks_in_region)`.
    pub fn lba_info(&self, lba: u32) -> Result<(u32, u32, u32), FirmwareFileSystemError> {
        let mut total_blocks = 0u32;
        let mut region_offset = 0u32;
        for entry in &self.block_map {
            let region_start = total_blocks;
            total_blocks = total_blocks.checked_add(entry.num_blocks).ok_or(FirmwareFileSystemError::InvalidBlockMap)?;
            if lba < total_blocks {
                let remaining = total_blocks - lba;
                let offset = (lba - region_start)
                    .checked_mul(entry.length)
                    .and_then(|x| x.checked_add(region_offset))
                    .ok_or(FirmwareFileSystemError::InvalidBlockMap)?;
                return Ok((offset, entry.length, remaining));
            }
            region_offset = entry
                .num_blocks
                .checked_mul(entry.length)
                .and_then(|x| x.checked_add(region_offset))
                .ok_or(FirmwareFileSystemError::InvalidBlockMap)?;
        }
        Err(FirmwareFileSystemError::InvalidParameter)
    }

    /// The raw FV attributes.
    pub fn attributes(&self) -> u32 {
        self.fv_header.attributes
    }

    /// Declared volume size in bytes.
    pub fn size(&self) -> u64 {
        self.fv_header.fv_length
    }

    pub fn file_system_guid(&self) -> efi::Guid {
        self.fv_header.file_system_guid()
    }

    /// The volume bytes, `size()` long.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Offset of the first file from the volume base.
    pub fn content_offset(&self) -> usize {
        self.content_offset
    }

    /// Lazily enumerate the files of the volume.
    ///
    /// PAD files are filtered out. A corrupt file is yielded as an error item and skipped. The walk only ends early
    /// when a file's size cannot be trusted.
    pub fn files(&self) -> impl Iterator<Item = Result<FileRef<'a>, FirmwareFileSystemError>> {
        FileRefIter::new(self.data, self.content_offset, self.erase_polarity())
            .filter(|x| !matches!(x, Ok(file) if file.file_type_raw() == file::r#type::FFS_PAD))
    }

    /// Find the first visible file with the given name.
    pub fn find_file(&self, name: &efi::Guid) -> Option<FileRef<'a>> {
        self.files().filter_map(Result::ok).find(|file| &file.name() == name)
    }
}

impl fmt::Debug for VolumeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeRef")
            .field("size", &self.data.len())
            .field("fv_name", &self.fv_name().map(|name| pi_sdk::guid_fmt!(name)))
            .field("attributes", &format_args!("{:#x}", self.fv_header.attributes))
            .field("block_map", &self.block_map)
            .field("content_offset", &self.content_offset)
            .finish()
    }
}

impl<'a> TryFrom<&'a [u8]> for VolumeRef<'a> {
    type Error = FirmwareFileSystemError;

    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        VolumeRef::new(value)
    }
}

struct FileRefIter<'a> {
    data: &'a [u8],
    next_offset: usize,
    erase_polarity: bool,
    done: bool,
}

impl<'a> FileRefIter<'a> {
    fn new(data: &'a [u8], start: usize, erase_polarity: bool) -> Self {
        Self { data, next_offset: start, erase_polarity, done: false }
    }

    fn fail(&mut self, error: FirmwareFileSystemError) -> Option<Result<FileRef<'a>, FirmwareFileSystemError>> {
        self.done = true;
        Some(Err(error))
    }

    /// Move past `length` bytes at the current offset; files start on 8-byte boundaries.
    fn advance(&mut self, length: usize) -> Result<(), FirmwareFileSystemError> {
        self.next_offset =
            align_up_usize(self.next_offset + length, 8).map_err(|_| FirmwareFileSystemError::DataCorrupt)?;
        Ok(())
    }
}

impl<'a> Iterator for FileRefIter<'a> {
    type Item = Result<FileRef<'a>, FirmwareFileSystemError>;

    fn next(&mut self) -> Option<Self::Item> {
        let erase_byte = if self.erase_polarity { 0xff } else { 0x00 };
        loop {
            if self.done {
                return None;
            }
            let remaining = self.data.get(self.next_offset..).unwrap_or_default();
            if remaining.len() < file::Header::SIZE {
                return None;
            }
            if remaining[..file::Header::SIZE].iter().all(|&x| x == erase_byte) {
                return None;
            }

            let header: file::Header = match remaining.pread_with(0, LE) {
                Ok(header) => header,
                Err(err) => return self.fail(err.into()),
            };

            match FileState::decode(header.state, self.erase_polarity) {
                FileState::Erased => return None,
                FileState::Invalid => {
                    log::warn!(target: "pi_ffs", "File at offset {:#x} has reserved state bits set.", self.next_offset);
                    return self.fail(FirmwareFileSystemError::InvalidState);
                }
                FileState::HeaderConstruction | FileState::HeaderInvalid => {
                    // The size field is not trustworthy; step over the fixed header only.
                    log::trace!(target: "pi_ffs", "Skipping incomplete header at offset {:#x}.", self.next_offset);
                    if let Err(err) = self.advance(file::Header::SIZE) {
                        return self.fail(err);
                    }
                }
                state @ (FileState::HeaderValid | FileState::Deleted) => {
                    let layout = match FileLayout::read(remaining) {
                        Ok(layout) if layout.size <= remaining.len() => layout,
                        Ok(_) | Err(_) => return self.fail(FirmwareFileSystemError::InvalidHeader),
                    };
                    log::trace!(
                        target: "pi_ffs",
                        "Skipping {:?} file {:?} at offset {:#x}.",
                        state,
                        header.name(),
                        self.next_offset
                    );
                    if let Err(err) = self.advance(layout.size) {
                        return self.fail(err);
                    }
                }
                FileState::DataValid | FileState::MarkedForUpdate => {
                    // Past this point the size is in bounds, so a corrupt file can be stepped over.
                    let layout = match FileLayout::read(remaining) {
                        Ok(layout) if layout.size <= remaining.len() => layout,
                        Ok(_) | Err(_) => {
                            log::warn!(target: "pi_ffs", "File at offset {:#x} has no usable size.", self.next_offset);
                            return self.fail(FirmwareFileSystemError::InvalidHeader);
                        }
                    };
                    let size = layout.size;
                    let file = match FileRef::with_layout(remaining, layout, self.erase_polarity) {
                        Ok(file) => file,
                        Err(err) => {
                            let offset = self.next_offset;
                            log::warn!(target: "pi_ffs", "Skipping corrupt file at offset {offset:#x}: {err:?}");
                            if let Err(advance_err) = self.advance(size) {
                                return self.fail(advance_err);
                            }
                            return Some(Err(err));
                        }
                    };
                    if file.name() == guid::EFI_FFS_VOLUME_TOP_FILE_GUID {
                        self.done = true;
                    } else if let Err(err) = self.advance(file.size()) {
                        return self.fail(err);
                    }
                    return Some(Ok(file));
                }
            }
        }
    }
}

/// Owned Firmware Volume for composition and serialization.
pub struct Volume {
    file_system_guid: efi::Guid,
    attributes: u32,
    ext_header: Option<(efi::Guid, Vec<u8>)>,
    block_map: Vec<BlockMapEntry>,
    files: Vec<File>,
}

impl Volume {
    /// Create an empty FFS2 volume with erase polarity 1 and the given block map.
    ///
    /// The serialized volume is padded with erased bytes up to the block map capacity.
    pub fn new(block_map: Vec<BlockMapEntry>) -> Self {
        Self {
            file_system_guid: guid::EFI_FIRMWARE_FILE_SYSTEM2_GUID,
            attributes: fv::attributes::ERASE_POLARITY | fv::attributes::READ_STATUS | fv::attributes::MEMORY_MAPPED,
            ext_header: None,
            block_map,
            files: Vec::new(),
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.iter()
    }

    pub fn files_mut(&mut self) -> &mut Vec<File> {
        &mut self.files
    }

    /// Use the FFS3 file system, which allows files of 16MB or more.
    pub fn set_large_file_support(&mut self, enabled: bool) {
        self.file_system_guid =
            if enabled { guid::EFI_FIRMWARE_FILE_SYSTEM3_GUID } else { guid::EFI_FIRMWARE_FILE_SYSTEM2_GUID };
    }

    pub fn set_attributes(&mut self, attributes: u32) {
        self.attributes = attributes;
    }

    /// Attach an extended header naming the volume, followed by `data`.
    pub fn set_ext_header(&mut self, fv_name: efi::Guid, data: Vec<u8>) {
        self.ext_header = Some((fv_name, data));
    }

    fn capacity(&self) -> usize {
        self.block_map.iter().map(|entry| entry.num_blocks as usize * entry.length as usize).sum()
    }

    fn pad_file(content: Vec<u8>) -> Result<File, FirmwareFileSystemError> {
        let mut pad_file = File::new(efi::Guid::from_bytes(&[0xffu8; 16]), file::r#type::FFS_PAD);
        let length = content.len().try_into().map_err(|_| FirmwareFileSystemError::InvalidHeader)?;
        pad_file.sections_mut().push(Section::new_from_header_with_data(SectionHeader::Pad(length), content)?);
        Ok(pad_file)
    }

    /// Serialize into a valid FV byte stream.
    ///
    /// Writes the header with its checksum and the block map, places the extended header in a PAD file, inserts
    /// PAD files to honor file data alignment, and fills the rest of the block map capacity with erased bytes.
    /// Fails with [`FirmwareFileSystemError::Unsupported`] for a large file in an FFS2 volume and with
    /// [`FirmwareFileSystemError::InvalidParameter`] when the files do not fit the block map.
    pub fn serialize(&self) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let erase_polarity = self.attributes & fv::attributes::ERASE_POLARITY != 0;
        let pad_byte = if erase_polarity { 0xffu8 } else { 0x00u8 };
        let large_file_support = self.file_system_guid == guid::EFI_FIRMWARE_FILE_SYSTEM3_GUID;

        let header_length = fv::Header::SIZE + (self.block_map.len() + 1) * BlockMapEntry::SIZE;
        let mut fv_buffer = alloc::vec![0u8; header_length];
        for (index, entry) in self.block_map.iter().chain(iter::once(&BlockMapEntry::default())).enumerate() {
            fv_buffer.pwrite_with(*entry, fv::Header::SIZE + index * BlockMapEntry::SIZE, LE)?;
        }

        let ext_header_offset = match &self.ext_header {
            Some((fv_name, data)) => {
                let ext_header = fv::ExtHeader {
                    fv_name: *fv_name.as_bytes(),
                    ext_header_size: (fv::ExtHeader::SIZE + data.len())
                        .try_into()
                        .map_err(|_| FirmwareFileSystemError::InvalidHeader)?,
                };
                let mut content = alloc::vec![0u8; fv::ExtHeader::SIZE];
                content.pwrite_with(ext_header, 0, LE)?;
                content.extend_from_slice(data);
                let pad_file = Self::pad_file(content)?;
                let offset = fv_buffer.len() + pad_file.content_offset();
                fv_buffer.extend(pad_file.serialize_with_polarity(erase_polarity)?);
                offset
            }
            None => 0,
        };

        for file in &self.files {
            let rem = fv_buffer.len() % 8;
            if rem != 0 {
                fv_buffer.extend(iter::repeat_n(pad_byte, 8 - rem));
            }

            let file_buffer = file.serialize_with_polarity(erase_polarity)?;
            if file_buffer.len() >= fv::FFS_V2_MAX_FILE_SIZE && !large_file_support {
                Err(FirmwareFileSystemError::Unsupported)?;
            }
            let layout = FileLayout::read(&file_buffer)?;

            let alignment = data_alignment(layout.header.attributes);
            if (fv_buffer.len() + layout.content_offset) % alignment != 0 {
                // A PAD file in front shifts the content onto the boundary.
                let base = fv_buffer.len() + file::Header::SIZE + layout.content_offset;
                let pad_len = (alignment - base % alignment) % alignment;
                let pad = Self::pad_file(alloc::vec![pad_byte; pad_len])?;
                fv_buffer.extend(pad.serialize_with_polarity(erase_polarity)?);
                let rem = fv_buffer.len() % 8;
                if rem != 0 {
                    fv_buffer.extend(iter::repeat_n(pad_byte, 8 - rem));
                }
            }
            fv_buffer.extend_from_slice(&file_buffer);
        }

        let capacity = self.capacity();
        if fv_buffer.len() > capacity {
            Err(FirmwareFileSystemError::InvalidParameter)?;
        }
        fv_buffer.resize(capacity, pad_byte);

        let mut fv_header = fv::Header {
            zero_vector: [0u8; 16],
            file_system_guid: *self.file_system_guid.as_bytes(),
            fv_length: capacity as u64,
            signature: fv::SIGNATURE,
            attributes: self.attributes,
            header_length: header_length.try_into().map_err(|_| FirmwareFileSystemError::InvalidHeader)?,
            checksum: 0,
            ext_header_offset: ext_header_offset.try_into().map_err(|_| FirmwareFileSystemError::InvalidHeader)?,
            reserved: 0,
            revision: fv::FFS_REVISION,
        };
        fv_buffer.pwrite_with(fv_header, 0, LE)?;
        fv_header.checksum = 0u16.wrapping_sub(sum16(&fv_buffer[..header_length]));
        fv_buffer.pwrite_with(fv_header, 0, LE)?;

        Ok(fv_buffer)
    }
}

impl TryFrom<&VolumeRef<'_>> for Volume {
    type Error = FirmwareFileSystemError;

    fn try_from(src: &VolumeRef<'_>) -> Result<Self, Self::Error> {
        let files = src.files().map(|file| file.and_then(File::try_from)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            file_system_guid: src.file_system_guid(),
            attributes: src.attributes(),
            ext_header: src.ext_header().map(|(header, data)| (header.fv_name(), data.to_vec())),
            block_map: src.block_map().to_vec(),
            files,
        })
    }
}

impl TryFrom<(&VolumeRef<'_>, &dyn SectionExtractor)> for Volume {
    type Error = FirmwareFileSystemError;

    /// Copy the volume and expand every encapsulation section through the extractor.
    fn try_from(src: (&VolumeRef<'_>, &dyn SectionExtractor)) -> Result<Self, Self::Error> {
        let (volume_ref, extractor) = src;
        let mut volume = Volume::try_from(volume_ref)?;
        for file in volume.files_mut() {
            file.extract(extractor)?;
        }
        Ok(volume)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::section::SectionHeader;
    use pi_sdk::pi::{fw_fs::section, sum8};
    use serde::Deserialize;
    use std::{string::String, vec, vec::Vec};

    /// A volume layout read from YAML: each file is a name byte, a type and a list of RAW payloads.
    #[derive(Deserialize)]
    struct VolumeFixture {
        block_size: u32,
        num_blocks: u32,
        files: Vec<FileFixture>,
    }

    #[derive(Deserialize)]
    struct FileFixture {
        name: u8,
        file_type: u8,
        #[serde(default)]
        alignment_attribute: u8,
        #[serde(default)]
        checksum: bool,
        sections: Vec<String>,
    }

    const FIXTURE: &str = r#"
block_size: 4096
num_blocks: 4
files:
  - name: 1
    file_type: 0x07
    sections: ["alpha", "one"]
  - name: 2
    file_type: 0x07
    checksum: true
    sections: ["beta"]
  - name: 3
    file_type: 0x06
    alignment_attribute: 0x20
    sections: ["gamma, aligned to 1KB"]
"#;

    fn guid(name: u8) -> efi::Guid {
        efi::Guid::from_bytes(&[name; 16])
    }

    fn raw(payload: &[u8]) -> Section {
        Section::new_from_header_with_data(SectionHeader::Standard(section::r#type::RAW, 0), payload.to_vec())
            .unwrap()
    }

    fn file_with(name: u8, payload: &[u8]) -> File {
        let mut file = File::new(guid(name), file::r#type::DRIVER);
        file.sections_mut().push(raw(payload));
        file
    }

    fn fix_header_checksum(bytes: &mut [u8]) {
        let header_length = u16::from_le_bytes([bytes[48], bytes[49]]) as usize;
        bytes[50..52].copy_from_slice(&[0, 0]);
        let checksum = 0u16.wrapping_sub(sum16(&bytes[..header_length]));
        bytes[50..52].copy_from_slice(&checksum.to_le_bytes());
    }

    fn build(fixture: &VolumeFixture) -> Volume {
        let mut volume =
            Volume::new(vec![BlockMapEntry { num_blocks: fixture.num_blocks, length: fixture.block_size }]);
        for entry in &fixture.files {
            let mut file = File::new(guid(entry.name), entry.file_type);
            file.set_attributes_raw(entry.alignment_attribute);
            file.set_data_checksum(entry.checksum);
            for payload in &entry.sections {
                file.sections_mut().push(raw(payload.as_bytes()));
            }
            volume.files_mut().push(file);
        }
        volume
    }

    #[test]
    fn fixture_volume_round_trips() {
        let fixture: VolumeFixture = serde_yaml::from_str(FIXTURE).unwrap();
        let bytes = build(&fixture).serialize().unwrap();
        assert_eq!(bytes.len(), 4 * 4096);

        let volume = VolumeRef::new(&bytes).unwrap();
        assert!(volume.erase_polarity());
        assert_eq!(volume.file_system_guid(), guid::EFI_FIRMWARE_FILE_SYSTEM2_GUID);
        let files = volume.files().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(files.len(), 3);
        for (file, expected) in files.iter().zip(&fixture.files) {
            assert_eq!(file.name(), guid(expected.name));
            assert_eq!(file.file_type_raw(), expected.file_type);
            let sections = file.sections().unwrap();
            assert_eq!(sections.len(), expected.sections.len());
            assert_eq!(sections[0].content(), expected.sections[0].as_bytes());
        }
        // Content of the aligned file starts on a 1KB boundary relative to the volume base.
        let aligned = &files[2];
        let offset = aligned.content().as_ptr() as usize - bytes.as_ptr() as usize;
        assert_eq!(offset % 1024, 0);
    }

    #[test]
    fn files_never_extend_past_volume_length() {
        let fixture: VolumeFixture = serde_yaml::from_str(FIXTURE).unwrap();
        let bytes = build(&fixture).serialize().unwrap();
        let volume = VolumeRef::new(&bytes).unwrap();
        for file in volume.files() {
            let file = file.unwrap();
            let start = file.data().as_ptr() as usize - bytes.as_ptr() as usize;
            assert!(start + file.size() <= volume.size() as usize);
        }
    }

    #[test]
    fn header_validation_rejects_corruption() {
        let bytes = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]).serialize().unwrap();
        assert!(VolumeRef::new(&bytes).is_ok());

        let mut bad_signature = bytes.clone();
        bad_signature[40] = b'X';
        assert_eq!(VolumeRef::new(&bad_signature).unwrap_err(), FirmwareFileSystemError::InvalidHeader);

        let mut bad_checksum = bytes.clone();
        bad_checksum[0] = 1;
        assert_eq!(VolumeRef::new(&bad_checksum).unwrap_err(), FirmwareFileSystemError::InvalidHeader);

        // Declared length beyond the mapped region.
        assert_eq!(VolumeRef::new(&bytes[..0x800]).unwrap_err(), FirmwareFileSystemError::InvalidHeader);

        assert_eq!(VolumeRef::new(&bytes[..16]).unwrap_err(), FirmwareFileSystemError::InvalidHeader);
    }

    #[test]
    fn unknown_file_system_is_unsupported() {
        let mut bytes = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]).serialize().unwrap();
        bytes[16] ^= 0xff;
        fix_header_checksum(&mut bytes);
        assert_eq!(VolumeRef::new(&bytes).unwrap_err(), FirmwareFileSystemError::Unsupported);
    }

    #[test]
    fn empty_block_map_is_rejected() {
        let bytes = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]).serialize().unwrap();
        let mut patched = bytes.clone();
        // Turn the single real entry into a zero entry.
        patched[56..64].copy_from_slice(&[0u8; 8]);
        fix_header_checksum(&mut patched);
        assert_eq!(VolumeRef::new(&patched).unwrap_err(), FirmwareFileSystemError::InvalidBlockMap);
    }

    #[test]
    fn ext_header_names_the_volume() {
        let name = guid(0x5a);
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        volume.set_ext_header(name, vec![1, 2, 3, 4]);
        volume.files_mut().push(file_with(1, b"after ext header"));
        let bytes = volume.serialize().unwrap();

        let volume = VolumeRef::new(&bytes).unwrap();
        assert_eq!(volume.fv_name(), Some(name));
        assert_eq!(volume.ext_header().unwrap().1, &[1, 2, 3, 4]);
        assert_eq!(volume.content_offset() % 8, 0);
        let files = volume.files().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name(), guid(1));
    }

    #[test]
    fn lba_info_walks_block_map() {
        let bytes = Volume::new(vec![
            BlockMapEntry { num_blocks: 2, length: 0x1000 },
            BlockMapEntry { num_blocks: 3, length: 0x200 },
        ])
        .serialize()
        .unwrap();
        let volume = VolumeRef::new(&bytes).unwrap();
        assert_eq!(volume.lba_info(0).unwrap(), (0, 0x1000, 2));
        assert_eq!(volume.lba_info(1).unwrap(), (0x1000, 0x1000, 1));
        assert_eq!(volume.lba_info(3).unwrap(), (0x2200, 0x200, 2));
        assert_eq!(volume.lba_info(5).unwrap_err(), FirmwareFileSystemError::InvalidParameter);
    }

    #[test]
    fn partially_written_files_are_skipped() {
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        let mut deleted = file_with(1, b"deleted");
        deleted.set_state(FileState::Deleted);
        let mut header_only = file_with(2, b"header only");
        header_only.set_state(FileState::HeaderValid);
        let mut updating = file_with(4, b"marked for update");
        updating.set_state(FileState::MarkedForUpdate);
        volume.files_mut().extend([deleted, header_only, file_with(3, b"valid"), updating]);
        let bytes = volume.serialize().unwrap();

        let volume = VolumeRef::new(&bytes).unwrap();
        let names = volume.files().map(|f| f.unwrap().name()).collect::<Vec<_>>();
        assert_eq!(names, vec![guid(3), guid(4)]);
    }

    #[test]
    fn header_under_construction_skips_one_header() {
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        let mut constructing = File::new(guid(1), file::r#type::DRIVER);
        constructing.set_state(FileState::HeaderConstruction);
        volume.files_mut().extend([constructing, file_with(2, b"next")]);
        let bytes = volume.serialize().unwrap();

        let volume = VolumeRef::new(&bytes).unwrap();
        let names = volume.files().map(|f| f.unwrap().name()).collect::<Vec<_>>();
        assert_eq!(names, vec![guid(2)]);
    }

    fn checksummed(name: u8, payload: &[u8]) -> File {
        let mut file = file_with(name, payload);
        file.set_data_checksum(true);
        file
    }

    /// Serializes files 1 to 3 and flips the byte `delta` bytes into file 2.
    fn volume_with_damaged_second_file(delta: usize) -> Vec<u8> {
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        volume.files_mut().extend([checksummed(1, b"good"), checksummed(2, b"bad"), checksummed(3, b"still found")]);
        let mut bytes = volume.serialize().unwrap();

        let volume_ref = VolumeRef::new(&bytes).unwrap();
        let second = volume_ref.files().nth(1).unwrap().unwrap();
        let offset = second.data().as_ptr() as usize - bytes.as_ptr() as usize;
        bytes[offset + delta] ^= 0x55;
        bytes
    }

    #[test]
    fn corrupt_data_is_skipped_and_walk_continues() {
        let bytes = volume_with_damaged_second_file(second_file_payload_offset());

        let volume = VolumeRef::new(&bytes).unwrap();
        let items = volume.files().collect::<Vec<_>>();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().name(), guid(1));
        assert_eq!(items[1].as_ref().unwrap_err(), &FirmwareFileSystemError::DataCorrupt);
        assert_eq!(items[2].as_ref().unwrap().name(), guid(3));
    }

    #[test]
    fn corrupt_header_is_skipped_and_walk_continues() {
        // Damage the name, which the header checksum covers but the size does not depend on.
        let bytes = volume_with_damaged_second_file(0);

        let volume = VolumeRef::new(&bytes).unwrap();
        let names = volume.files().filter_map(Result::ok).map(|file| file.name()).collect::<Vec<_>>();
        assert_eq!(names, vec![guid(1), guid(3)]);
        assert_eq!(volume.files().filter(Result::is_err).count(), 1);
        assert_eq!(volume.find_file(&guid(3)).map(|file| file.name()), Some(guid(3)));
    }

    /// Offset of the last payload byte inside a single-section file.
    fn second_file_payload_offset() -> usize {
        file::Header::SIZE + 4 + b"bad".len() - 1
    }

    #[test]
    fn oversized_file_does_not_read_past_volume() {
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        volume.files_mut().push(file_with(1, b"grows"));
        let mut bytes = volume.serialize().unwrap();
        let offset = VolumeRef::new(&bytes).unwrap().content_offset();
        // Claim a size past the end of the volume and fix up the header checksum.
        bytes[offset + 20..offset + 23].copy_from_slice(&[0x00, 0x20, 0x00]);
        bytes[offset + 16] = 0;
        let sum = sum8(&bytes[offset..offset + 24]).wrapping_sub(bytes[offset + 17]).wrapping_sub(bytes[offset + 23]);
        bytes[offset + 16] = 0u8.wrapping_sub(sum);

        let volume = VolumeRef::new(&bytes).unwrap();
        let items = volume.files().collect::<Vec<_>>();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn volume_top_file_is_last() {
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        let mut top = File::new(guid::EFI_FFS_VOLUME_TOP_FILE_GUID, file::r#type::RAW);
        top.sections_mut().push(raw(b"reset vector"));
        volume.files_mut().extend([file_with(1, b"first"), top, file_with(2, b"hidden")]);
        let bytes = volume.serialize().unwrap();

        let volume = VolumeRef::new(&bytes).unwrap();
        let names = volume.files().map(|f| f.unwrap().name()).collect::<Vec<_>>();
        assert_eq!(names, vec![guid(1), guid::EFI_FFS_VOLUME_TOP_FILE_GUID]);
    }

    #[test]
    fn zero_polarity_volume_enumerates() {
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x1000 }]);
        volume.set_attributes(fv::attributes::READ_STATUS);
        volume.files_mut().push(file_with(1, b"zero erased"));
        let bytes = volume.serialize().unwrap();
        assert_eq!(*bytes.last().unwrap(), 0);

        let volume = VolumeRef::new(&bytes).unwrap();
        assert_eq!(volume.erase_byte(), 0);
        assert_eq!(volume.files().count(), 1);
    }

    #[test]
    fn large_file_requires_ffs3() {
        let big = vec![0x5au8; fv::FFS_V2_MAX_FILE_SIZE];
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 0x1100, length: 0x1000 }]);
        volume.files_mut().push(file_with(1, &big));
        assert_eq!(volume.serialize().unwrap_err(), FirmwareFileSystemError::Unsupported);

        volume.set_large_file_support(true);
        let bytes = volume.serialize().unwrap();
        let volume = VolumeRef::new(&bytes).unwrap();
        let file = volume.files().next().unwrap().unwrap();
        assert_eq!(file.content_offset(), file::Header2::SIZE);
        assert_eq!(file.sections().unwrap()[0].content().len(), big.len());
    }

    #[test]
    fn volume_too_small_is_rejected() {
        let mut volume = Volume::new(vec![BlockMapEntry { num_blocks: 1, length: 0x100 }]);
        volume.files_mut().push(file_with(1, &[0u8; 0x200]));
        assert_eq!(volume.serialize().unwrap_err(), FirmwareFileSystemError::InvalidParameter);
    }

    #[test]
    fn owned_copy_reserializes_identically() {
        let fixture: VolumeFixture = serde_yaml::from_str(FIXTURE).unwrap();
        let bytes = build(&fixture).serialize().unwrap();
        let volume_ref = VolumeRef::new(&bytes).unwrap();
        let copy = Volume::try_from(&volume_ref).unwrap();
        assert_eq!(copy.serialize().unwrap(), bytes);
    }
}
