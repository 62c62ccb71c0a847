//! Section parsing and composition for Firmware File System files.
//!
//! A [`Section`] is either a leaf (PE32, DEPEX, RAW, ...) or an encapsulation (compression or GUID-defined) whose
//! payload is itself a list of sections. Encapsulations start out unexpanded; [`Section::extract`] runs a
//! [`SectionExtractor`] over them and parses the result.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{boxed::Box, vec::Vec};
use core::{fmt, iter};

use pi_sdk::{base::align_up_usize, pi::fw_fs::section};
use scroll::{Pread, Pwrite, LE};

use crate::FirmwareFileSystemError;

/// Encapsulations nested deeper than this are rejected.
pub const MAX_ENCAPSULATION_DEPTH: usize = 16;

/// Extracts the payload of an encapsulation section into raw bytes.
///
/// An implementation should return:
/// - `Ok(Vec<u8>)` with the concatenated sub-section bytes when it handles the section.
/// - `Err(FirmwareFileSystemError::Unsupported)` when it does not handle this section type or GUID.
/// - Any other `Err(..)` for a payload it handles but cannot decode.
pub trait SectionExtractor {
    /// Attempt to extract the content of `section` into a buffer of zero or more serialized sub-sections.
    fn extract(&self, section: &Section) -> Result<Vec<u8>, FirmwareFileSystemError>;
}

/// Logical header of each supported section variant. The trailing `u32` is the content size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionHeader {
    /// Header-less padding used for alignment inside pad files.
    Pad(u32),
    /// Leaf section; `(raw_type, content_size)`.
    Standard(u8, u32),
    /// Compression encapsulation; `(header, compressed_size)`.
    Compression(section::Compression, u32),
    /// GUID-defined encapsulation; `(header, guid_specific_data, payload_size)`.
    GuidDefined(section::GuidDefined, Vec<u8>, u32),
    /// Version section; `(header, content_size)`.
    Version(section::Version, u32),
    /// Freeform subtype GUID section; `(header, content_size)`.
    FreeFormSubtypeGuid(section::FreeformSubtypeGuid, u32),
}

impl SectionHeader {
    /// Number of bytes the serialized header occupies.
    pub fn content_offset(&self) -> usize {
        self.serialize().len()
    }

    /// Total serialized size of the section (header + content).
    pub fn total_section_size(&self) -> usize {
        self.content_offset() + self.content_size()
    }

    /// Size of the section content, excluding all header bytes.
    pub fn content_size(&self) -> usize {
        match self {
            SectionHeader::Pad(content_size)
            | SectionHeader::Standard(_, content_size)
            | SectionHeader::Compression(_, content_size)
            | SectionHeader::GuidDefined(_, _, content_size)
            | SectionHeader::Version(_, content_size)
            | SectionHeader::FreeFormSubtypeGuid(_, content_size) => *content_size as usize,
        }
    }

    /// The raw section type stored in the common header.
    pub fn section_type_raw(&self) -> u8 {
        match self {
            SectionHeader::Pad(_) => section::r#type::RAW,
            SectionHeader::Standard(raw_type, _) => *raw_type,
            SectionHeader::Compression(_, _) => section::r#type::COMPRESSION,
            SectionHeader::GuidDefined(_, _, _) => section::r#type::GUID_DEFINED,
            SectionHeader::Version(_, _) => section::r#type::VERSION,
            SectionHeader::FreeFormSubtypeGuid(_, _) => section::r#type::FREEFORM_SUBTYPE_GUID,
        }
    }

    /// Serialize the header into the bytes that prefix the section content.
    ///
    /// A section of 16MB or more gets the extended header. The `data_offset` of a GUID-defined header is
    /// recomputed to match the emitted layout.
    pub fn serialize(&self) -> Vec<u8> {
        let mut variant = [0u8; section::GuidDefined::SIZE];
        let (variant_len, guid_data, content_size): (usize, &[u8], u32) = match self {
            SectionHeader::Pad(_) => return Vec::new(),
            SectionHeader::Standard(_, content_size) => (0, &[], *content_size),
            SectionHeader::Compression(compression, content_size) => {
                (variant.pwrite_with(*compression, 0, LE).unwrap_or(0), &[], *content_size)
            }
            SectionHeader::GuidDefined(guid_defined, data, content_size) => {
                (variant.pwrite_with(*guid_defined, 0, LE).unwrap_or(0), data.as_slice(), *content_size)
            }
            SectionHeader::Version(version, content_size) => {
                (variant.pwrite_with(*version, 0, LE).unwrap_or(0), &[], *content_size)
            }
            SectionHeader::FreeFormSubtypeGuid(freeform, content_size) => {
                (variant.pwrite_with(*freeform, 0, LE).unwrap_or(0), &[], *content_size)
            }
        };

        let body_len = variant_len + guid_data.len() + content_size as usize;
        let extended = section::Header::SIZE + body_len >= section::MAX_STANDARD_SECTION_SIZE;
        let common_len = if extended { section::ExtendedHeader::SIZE } else { section::Header::SIZE };
        let section_size = common_len + body_len;

        let mut out = Vec::with_capacity(common_len + variant_len + guid_data.len());
        if extended {
            out.extend_from_slice(&[0xff, 0xff, 0xff, self.section_type_raw()]);
            out.extend_from_slice(&(section_size as u32).to_le_bytes());
        } else {
            let size = (section_size as u32).to_le_bytes();
            out.extend_from_slice(&[size[0], size[1], size[2], self.section_type_raw()]);
        }

        if let SectionHeader::GuidDefined(guid_defined, _, _) = self {
            let mut guid_defined = *guid_defined;
            guid_defined.data_offset = (common_len + section::GuidDefined::SIZE + guid_data.len()) as u16;
            // `variant` is exactly GuidDefined::SIZE long.
            let _ = variant.pwrite_with(guid_defined, 0, LE);
        }
        out.extend_from_slice(&variant[..variant_len]);
        out.extend_from_slice(guid_data);
        out
    }
}

#[derive(Clone)]
struct EncapsulationSectionData {
    sub_sections: Vec<Section>,
    data: Vec<u8>,
    extracted: bool,
}

#[derive(Clone)]
enum SectionData {
    Leaf(Vec<u8>),
    Encapsulation(EncapsulationSectionData),
}

impl fmt::Debug for SectionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionData::Leaf(data) => f.debug_struct("Leaf").field("len", &data.len()).finish(),
            SectionData::Encapsulation(enc) => f
                .debug_struct("Encapsulation")
                .field("len", &enc.data.len())
                .field("extracted", &enc.extracted)
                .field("sub_sections", &enc.sub_sections)
                .finish(),
        }
    }
}

/// A parsed or constructed section.
#[derive(Debug, Clone)]
pub struct Section {
    header: SectionHeader,
    data: SectionData,
}

impl Section {
    /// Construct a section from a logical header and its content.
    ///
    /// The header content size is replaced with `data.len()`.
    pub fn new_from_header_with_data(header: SectionHeader, data: Vec<u8>) -> Result<Self, FirmwareFileSystemError> {
        let size: u32 = data.len().try_into().map_err(|_| FirmwareFileSystemError::InvalidParameter)?;
        let header = match header {
            SectionHeader::Pad(_) => {
                return Ok(Self { header: SectionHeader::Pad(size), data: SectionData::Leaf(data) });
            }
            SectionHeader::Standard(t, _) => SectionHeader::Standard(t, size),
            SectionHeader::Compression(h, _) => SectionHeader::Compression(h, size),
            SectionHeader::GuidDefined(h, d, _) => SectionHeader::GuidDefined(h, d, size),
            SectionHeader::Version(h, _) => SectionHeader::Version(h, size),
            SectionHeader::FreeFormSubtypeGuid(h, _) => SectionHeader::FreeFormSubtypeGuid(h, size),
        };
        let mut buffer = header.serialize();
        buffer.extend(data);
        Self::new_from_buffer(&buffer)
    }

    /// Parse one serialized section from the front of `buffer`.
    ///
    /// Encapsulation sections come back unexpanded.
    pub fn new_from_buffer(buffer: &[u8]) -> Result<Self, FirmwareFileSystemError> {
        let common: section::Header = buffer.pread_with(0, LE)?;

        let (section_size, body_offset) = if common.is_extended() {
            let ext: section::ExtendedHeader = buffer.pread_with(0, LE)?;
            (ext.extended_size as usize, section::ExtendedHeader::SIZE)
        } else {
            (common.size24(), section::Header::SIZE)
        };

        if section_size < body_offset || section_size > buffer.len() {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }
        let section_bytes = &buffer[..section_size];

        let content_size = |offset: usize| -> Result<u32, FirmwareFileSystemError> {
            section_size
                .checked_sub(offset)
                .and_then(|size| u32::try_from(size).ok())
                .ok_or(FirmwareFileSystemError::InvalidHeader)
        };

        let (header, content_offset) = match common.section_type {
            section::r#type::COMPRESSION => {
                let compression: section::Compression = section_bytes.pread_with(body_offset, LE)?;
                let offset = body_offset + section::Compression::SIZE;
                (SectionHeader::Compression(compression, content_size(offset)?), offset)
            }
            section::r#type::GUID_DEFINED => {
                let guid_defined: section::GuidDefined = section_bytes.pread_with(body_offset, LE)?;
                let data_offset = guid_defined.data_offset as usize;
                let specific_start = body_offset + section::GuidDefined::SIZE;
                if data_offset < specific_start || data_offset > section_size {
                    Err(FirmwareFileSystemError::InvalidHeader)?;
                }
                let guid_specific = section_bytes[specific_start..data_offset].to_vec();
                (SectionHeader::GuidDefined(guid_defined, guid_specific, content_size(data_offset)?), data_offset)
            }
            section::r#type::VERSION => {
                let version: section::Version = section_bytes.pread_with(body_offset, LE)?;
                let offset = body_offset + section::Version::SIZE;
                (SectionHeader::Version(version, content_size(offset)?), offset)
            }
            section::r#type::FREEFORM_SUBTYPE_GUID => {
                let freeform: section::FreeformSubtypeGuid = section_bytes.pread_with(body_offset, LE)?;
                let offset = body_offset + section::FreeformSubtypeGuid::SIZE;
                (SectionHeader::FreeFormSubtypeGuid(freeform, content_size(offset)?), offset)
            }
            other => (SectionHeader::Standard(other, content_size(body_offset)?), body_offset),
        };

        let content = section_bytes[content_offset..].to_vec();
        let data = match header {
            SectionHeader::Compression(_, _) | SectionHeader::GuidDefined(_, _, _) => {
                SectionData::Encapsulation(EncapsulationSectionData {
                    sub_sections: Vec::new(),
                    data: content,
                    extracted: false,
                })
            }
            _ => SectionData::Leaf(content),
        };

        Ok(Section { header, data })
    }

    /// Borrow the logical header of this section.
    pub fn header(&self) -> &SectionHeader {
        &self.header
    }

    /// Whether this section is an encapsulation.
    pub fn encapsulation(&self) -> bool {
        matches!(self.data, SectionData::Encapsulation(_))
    }

    /// Whether this encapsulation has been expanded.
    pub fn extracted(&self) -> bool {
        matches!(&self.data, SectionData::Encapsulation(enc) if enc.extracted)
    }

    /// The total serialized size of this section.
    pub fn size(&self) -> usize {
        self.header.total_section_size()
    }

    /// Raw section type.
    pub fn section_type_raw(&self) -> u8 {
        self.header.section_type_raw()
    }

    /// The section content: leaf data, or the still-encoded payload of an encapsulation.
    pub fn content(&self) -> &[u8] {
        match &self.data {
            SectionData::Encapsulation(encapsulation) => &encapsulation.data,
            SectionData::Leaf(leaf) => leaf,
        }
    }

    /// Serialize the section (header + content).
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = self.header.serialize();
        data.extend_from_slice(self.content());
        data
    }

    /// Expand this encapsulation (and everything nested in it) through `extractor`.
    ///
    /// When the extractor reports `Unsupported`, an encapsulation whose payload is stored unencoded (compression
    /// type `NOT_COMPRESSED`, or a GUID-defined section without `PROCESSING_REQUIRED`) is parsed as is; any other is
    /// left with no sub-sections.
    pub fn extract(&mut self, extractor: &dyn SectionExtractor) -> Result<(), FirmwareFileSystemError> {
        self.extract_nested(extractor, 0)
    }

    fn extract_nested(
        &mut self,
        extractor: &dyn SectionExtractor,
        depth: usize,
    ) -> Result<(), FirmwareFileSystemError> {
        if !matches!(&self.data, SectionData::Encapsulation(x) if !x.extracted) {
            return Ok(());
        }
        if depth >= MAX_ENCAPSULATION_DEPTH {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        let extracted_data = match extractor.extract(self) {
            Err(FirmwareFileSystemError::Unsupported) => match self.unencoded_payload() {
                Some(payload) => payload.to_vec(),
                None => {
                    log::debug!(target: "pi_ffs", "no extractor for encapsulation section {:?}", self.header);
                    Vec::new()
                }
            },
            result => result?,
        };

        let mut sections = SectionIterator::new(&extracted_data).collect::<Result<Vec<_>, _>>()?;
        for section in sections.iter_mut() {
            section.extract_nested(extractor, depth + 1)?;
        }

        if let SectionData::Encapsulation(encapsulation) = &mut self.data {
            encapsulation.sub_sections = sections;
            encapsulation.extracted = true;
        }
        Ok(())
    }

    fn unencoded_payload(&self) -> Option<&[u8]> {
        match &self.header {
            SectionHeader::Compression(compression, _)
                if compression.compression_type == section::Compression::NOT_COMPRESSED =>
            {
                Some(self.content())
            }
            SectionHeader::GuidDefined(guid_defined, _, _)
                if guid_defined.attributes & section::GuidDefined::PROCESSING_REQUIRED == 0 =>
            {
                Some(self.content())
            }
            _ => None,
        }
    }

    /// This section followed by every section nested in it, depth first.
    pub fn sections(&self) -> Box<dyn Iterator<Item = &Section> + '_> {
        match &self.data {
            SectionData::Encapsulation(encapsulation) => {
                Box::new(iter::once(self).chain(encapsulation.sub_sections.iter().flat_map(|x| x.sections())))
            }
            SectionData::Leaf(_) => Box::new(iter::once(self)),
        }
    }

    /// The immediate sub-sections of an extracted encapsulation.
    pub fn sub_sections(&self) -> impl Iterator<Item = &Section> {
        match &self.data {
            SectionData::Encapsulation(encapsulation) => encapsulation.sub_sections.iter(),
            SectionData::Leaf(_) => (&[] as &[Section]).iter(),
        }
    }
}

impl TryFrom<&[u8]> for Section {
    type Error = FirmwareFileSystemError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Section::new_from_buffer(value)
    }
}

/// Lazily parses a run of 4-byte aligned sections. Iteration stops after the first error.
pub struct SectionIterator<'a> {
    data: &'a [u8],
    next_offset: usize,
    error: bool,
}

impl<'a> SectionIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, next_offset: 0, error: false }
    }
}

impl Iterator for SectionIterator<'_> {
    type Item = Result<Section, FirmwareFileSystemError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error || self.next_offset >= self.data.len() {
            return None;
        }

        let result = Section::new_from_buffer(&self.data[self.next_offset..]);
        match &result {
            Ok(section) => match align_up_usize(self.next_offset + section.size(), 4) {
                Ok(next) => self.next_offset = next,
                Err(_) => {
                    self.error = true;
                    return Some(Err(FirmwareFileSystemError::DataCorrupt));
                }
            },
            Err(_) => self.error = true,
        }
        Some(result)
    }
}
