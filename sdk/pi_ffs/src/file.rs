//! Firmware File System file parsing and composition.
//!
//! - [`FileRef`]: a zero-copy view over one serialized FFS file.
//! - [`File`]: an owned builder that serializes a file from sections with correct checksums.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::fmt;

use pi_sdk::pi::{
    fw_fs::file::{self, attributes, state},
    sum8,
};
use r_efi::efi;
use scroll::{Pread, Pwrite, LE};

use crate::{
    section::{Section, SectionExtractor, SectionIterator},
    FirmwareFileSystemError,
};

/// A file state decoded with the volume's erase polarity.
///
/// The most significant set bit of the normalized state byte wins, so a file moving through its lifecycle only
/// ever programs more bits away from the erased value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Nothing programmed; free space.
    Erased,
    HeaderConstruction,
    HeaderValid,
    DataValid,
    MarkedForUpdate,
    Deleted,
    HeaderInvalid,
    /// A reserved bit was programmed.
    Invalid,
}

impl FileState {
    /// Decode a raw state byte. `erase_polarity` is true when erased flash reads as ones.
    pub fn decode(raw: u8, erase_polarity: bool) -> Self {
        let normalized = if erase_polarity { !raw } else { raw };
        match normalized.checked_ilog2().map(|bit| 1u8 << bit) {
            None => FileState::Erased,
            Some(state::HEADER_CONSTRUCTION) => FileState::HeaderConstruction,
            Some(state::HEADER_VALID) => FileState::HeaderValid,
            Some(state::DATA_VALID) => FileState::DataValid,
            Some(state::MARKED_FOR_UPDATE) => FileState::MarkedForUpdate,
            Some(state::DELETED) => FileState::Deleted,
            Some(state::HEADER_INVALID) => FileState::HeaderInvalid,
            Some(_) => FileState::Invalid,
        }
    }

    /// Whether a file in this state is handed out by enumeration.
    pub fn is_visible(&self) -> bool {
        matches!(self, FileState::DataValid | FileState::MarkedForUpdate)
    }

    /// The state bits to program (before polarity) to reach this state.
    fn bits(&self) -> u8 {
        let data_valid = state::HEADER_CONSTRUCTION | state::HEADER_VALID | state::DATA_VALID;
        match self {
            FileState::Erased => 0,
            FileState::HeaderConstruction => state::HEADER_CONSTRUCTION,
            FileState::HeaderValid => state::HEADER_CONSTRUCTION | state::HEADER_VALID,
            FileState::DataValid => data_valid,
            FileState::MarkedForUpdate => data_valid | state::MARKED_FOR_UPDATE,
            FileState::Deleted => data_valid | state::DELETED,
            FileState::HeaderInvalid => data_valid | state::HEADER_INVALID,
            FileState::Invalid => 0x80,
        }
    }
}

/// Decode the content alignment in bytes from a file attributes byte.
pub fn data_alignment(attributes: u8) -> usize {
    let index = (attributes & attributes::DATA_ALIGNMENT) >> 3;
    let shift = if attributes & attributes::DATA_ALIGNMENT_2 != 0 {
        17 + index as u32
    } else {
        [0u32, 4, 7, 9, 10, 12, 15, 16][index as usize]
    };
    1usize << shift
}

/// Parsed header facts shared by the volume walker and [`FileRef`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileLayout {
    pub header: file::Header,
    pub size: usize,
    pub content_offset: usize,
}

impl FileLayout {
    /// Reads the header and size of the file at the front of `buffer` without checking state or checksums.
    pub fn read(buffer: &[u8]) -> Result<Self, FirmwareFileSystemError> {
        let header: file::Header = buffer.pread_with(0, LE)?;
        let (size, content_offset) = if header.attributes & attributes::LARGE_FILE == 0 {
            (header.size24(), file::Header::SIZE)
        } else {
            let header2: file::Header2 = buffer.pread_with(0, LE)?;
            let size = usize::try_from(header2.extended_size).map_err(|_| FirmwareFileSystemError::InvalidHeader)?;
            (size, file::Header2::SIZE)
        };
        if size < content_offset {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }
        Ok(Self { header, size, content_offset })
    }
}

/// Zero-copy view over an FFS file backed by a byte slice.
#[derive(Clone)]
pub struct FileRef<'a> {
    data: &'a [u8],
    header: file::Header,
    erase_polarity: bool,
    state: FileState,
    content_offset: usize,
}

impl<'a> FileRef<'a> {
    /// Parse a byte slice as an FFS file and validate header, state, and checksums.
    ///
    /// The erase polarity is inferred from the reserved top bit of the state byte, which must hold the erased
    /// value.
    ///
    /// Errors
    /// - [`FirmwareFileSystemError::InvalidHeader`]: malformed header, bad header checksum, or a size past the end of
    ///   `buffer`.
    /// - [`FirmwareFileSystemError::InvalidState`]: the file is not in the `DATA_VALID` or `MARKED_FOR_UPDATE` state.
    /// - [`FirmwareFileSystemError::DataCorrupt`]: data checksum mismatch.
    pub fn new(buffer: &'a [u8]) -> Result<Self, FirmwareFileSystemError> {
        let layout = FileLayout::read(buffer)?;
        let erase_polarity = layout.header.state & 0x80 != 0;
        Self::with_layout(buffer, layout, erase_polarity)
    }

    pub(crate) fn with_layout(
        buffer: &'a [u8],
        layout: FileLayout,
        erase_polarity: bool,
    ) -> Result<Self, FirmwareFileSystemError> {
        let FileLayout { header, size, content_offset } = layout;
        if size > buffer.len() {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        let file_state = FileState::decode(header.state, erase_polarity);
        if !file_state.is_visible() {
            Err(FirmwareFileSystemError::InvalidState)?;
        }

        // The header checksum covers the header with the state and file checksum bytes taken as zero.
        let sum = sum8(&buffer[..content_offset]).wrapping_sub(header.state).wrapping_sub(header.integrity_check_file);
        if sum != 0 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        if header.attributes & attributes::CHECKSUM == 0 {
            if header.integrity_check_file != file::FFS_FIXED_CHECKSUM {
                Err(FirmwareFileSystemError::InvalidHeader)?;
            }
        } else if sum8(&buffer[content_offset..size]).wrapping_add(header.integrity_check_file) != 0 {
            Err(FirmwareFileSystemError::DataCorrupt)?;
        }

        Ok(Self { data: &buffer[..size], header, erase_polarity, state: file_state, content_offset })
    }

    /// Total serialized size of the file in bytes (header + content).
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The file name GUID.
    pub fn name(&self) -> efi::Guid {
        self.header.name()
    }

    /// The raw FFS file type byte.
    pub fn file_type_raw(&self) -> u8 {
        self.header.file_type
    }

    /// The raw attributes byte.
    pub fn attributes_raw(&self) -> u8 {
        self.header.attributes
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// The file payload (sections area), excluding the header.
    pub fn content(&self) -> &'a [u8] {
        &self.data[self.content_offset..]
    }

    /// Byte offset from the start of the file to the beginning of content.
    pub fn content_offset(&self) -> usize {
        self.content_offset
    }

    /// The complete file bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn erase_polarity(&self) -> bool {
        self.erase_polarity
    }

    /// Required content alignment in bytes, decoded from the attribute bits.
    pub fn data_alignment(&self) -> usize {
        data_alignment(self.header.attributes)
    }

    /// Parse the top-level sections. Encapsulations are not expanded.
    pub fn sections(&self) -> Result<Vec<Section>, FirmwareFileSystemError> {
        SectionIterator::new(self.content()).collect()
    }

    /// Parse all sections, expanding encapsulations through `extractor`, and flatten them depth first.
    pub fn sections_with_extractor(
        &self,
        extractor: &dyn SectionExtractor,
    ) -> Result<Vec<Section>, FirmwareFileSystemError> {
        let mut sections = self.sections()?;
        for section in sections.iter_mut() {
            section.extract(extractor)?;
        }
        Ok(sections.iter().flat_map(|x| x.sections().cloned().collect::<Vec<_>>()).collect())
    }
}

impl fmt::Debug for FileRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRef")
            .field("name", &pi_sdk::guid_fmt!(self.name()))
            .field("type", &self.header.file_type)
            .field("size", &self.size())
            .field("state", &self.state)
            .finish()
    }
}

/// Owned FFS file for composition and serialization.
pub struct File {
    name: efi::Guid,
    file_type_raw: u8,
    attributes: u8,
    erase_polarity: bool,
    state: FileState,
    sections: Vec<Section>,
}

impl File {
    /// Create an empty file. Defaults: erase polarity 1, `DATA_VALID`, fixed checksum.
    pub fn new(name: efi::Guid, file_type_raw: u8) -> Self {
        Self {
            name,
            file_type_raw,
            attributes: 0,
            erase_polarity: true,
            state: FileState::DataValid,
            sections: Vec::new(),
        }
    }

    /// Serialize into a valid FFS file: header (large when required), 4-byte aligned sections, and checksums.
    pub fn serialize(&self) -> Result<Vec<u8>, FirmwareFileSystemError> {
        self.serialize_with_polarity(self.erase_polarity)
    }

    /// Serialize with the erase polarity of the volume the file is placed in.
    pub(crate) fn serialize_with_polarity(&self, erase_polarity: bool) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let content = self.serialize_content();
        let large = self.attributes & attributes::LARGE_FILE != 0
            || content.len() + file::Header::SIZE > 0xffffff;
        let header_size = if large { file::Header2::SIZE } else { file::Header::SIZE };
        let size = header_size + content.len();

        let mut header = file::Header {
            name: *self.name.as_bytes(),
            integrity_check_header: 0,
            integrity_check_file: 0,
            file_type: self.file_type_raw,
            attributes: self.attributes,
            size: [0u8; 3],
            state: 0,
        };
        if large {
            header.attributes |= attributes::LARGE_FILE;
        } else {
            let bytes = (size as u32).to_le_bytes();
            header.size = [bytes[0], bytes[1], bytes[2]];
        }

        let mut buffer = Vec::with_capacity(size);
        buffer.resize(header_size, 0);
        buffer.pwrite_with(header, 0, LE)?;
        if large {
            buffer.pwrite_with(size as u64, file::Header::SIZE, LE)?;
        }

        buffer[0x10] = 0u8.wrapping_sub(sum8(&buffer));
        buffer[file::Header::FILE_CHECKSUM_OFFSET] = if self.is_data_checksum() {
            0u8.wrapping_sub(sum8(&content))
        } else {
            file::FFS_FIXED_CHECKSUM
        };
        let bits = self.state.bits();
        buffer[file::Header::STATE_OFFSET] = if erase_polarity { !bits } else { bits };

        buffer.extend(content);
        Ok(buffer)
    }

    fn serialize_content(&self) -> Vec<u8> {
        let mut content = Vec::new();
        let mut section_iter = self.sections.iter().peekable();
        while let Some(section) = section_iter.next() {
            content.extend_from_slice(&section.serialize());
            // Sections start 4-byte aligned; pad bytes are zero and nothing follows the last one.
            if section_iter.peek().is_some() && content.len() % 4 != 0 {
                content.resize(content.len() + 4 - content.len() % 4, 0);
            }
        }
        content
    }

    /// Header size (offset to content) this file will serialize with.
    pub fn content_offset(&self) -> usize {
        if self.attributes & attributes::LARGE_FILE != 0
            || self.serialize_content().len() + file::Header::SIZE > 0xffffff
        {
            file::Header2::SIZE
        } else {
            file::Header::SIZE
        }
    }

    pub fn set_erase_polarity(&mut self, erase_polarity: bool) {
        self.erase_polarity = erase_polarity;
    }

    /// Serialize with a state other than `DATA_VALID`; used to lay out partially written volumes.
    pub fn set_state(&mut self, state: FileState) {
        self.state = state;
    }

    /// Enable or disable the data checksum attribute.
    pub fn set_data_checksum(&mut self, checksum: bool) {
        if checksum {
            self.attributes |= attributes::CHECKSUM;
        } else {
            self.attributes &= !attributes::CHECKSUM;
        }
    }

    /// Set the raw attribute bits (alignment, fixed, large file).
    pub fn set_attributes_raw(&mut self, attributes: u8) {
        self.attributes = attributes;
    }

    pub fn is_data_checksum(&self) -> bool {
        self.attributes & attributes::CHECKSUM != 0
    }

    /// Run the extractor over all sections in place.
    pub fn extract(&mut self, extractor: &dyn SectionExtractor) -> Result<(), FirmwareFileSystemError> {
        for section in self.sections.iter_mut() {
            section.extract(extractor)?;
        }
        Ok(())
    }

    pub fn sections(&self) -> &Vec<Section> {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut Vec<Section> {
        &mut self.sections
    }

    /// All sections, nested ones included, depth first.
    pub fn section_iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().flat_map(|x| x.sections())
    }

    pub fn name(&self) -> efi::Guid {
        self.name
    }

    pub fn file_type_raw(&self) -> u8 {
        self.file_type_raw
    }

    pub fn attributes_raw(&self) -> u8 {
        self.attributes
    }
}

impl TryFrom<FileRef<'_>> for File {
    type Error = FirmwareFileSystemError;

    fn try_from(src: FileRef<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            name: src.name(),
            file_type_raw: src.file_type_raw(),
            attributes: src.attributes_raw(),
            erase_polarity: src.erase_polarity(),
            state: src.state(),
            sections: src.sections()?,
        })
    }
}
