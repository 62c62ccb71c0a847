//! Module for Brotli decompression.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{boxed::Box, vec, vec::Vec};
use alloc_no_stdlib::{self, define_index_ops_mut, SliceWrapper, SliceWrapperMut};
use brotli_decompressor::{BrotliDecompressStream, BrotliResult, BrotliState, HuffmanCode};
use pi_ffs::{
    section::{Section, SectionExtractor, SectionHeader},
    FirmwareFileSystemError,
};
use pi_sdk::pi::fw_fs::guid;

/// Output size (u64) and scratch size (u64) precede the Brotli stream.
const BROTLI_HEADER_SIZE: usize = 16;

// The decoder takes its own allocator; these route its cells to the global heap.
struct Rebox<T>(Box<[T]>);

impl<T> core::default::Default for Rebox<T> {
    fn default() -> Self {
        Rebox(Vec::new().into_boxed_slice())
    }
}

define_index_ops_mut!(T, Rebox<T>);

impl<T> alloc_no_stdlib::SliceWrapper<T> for Rebox<T> {
    fn slice(&self) -> &[T] {
        &self.0
    }
}

impl<T> alloc_no_stdlib::SliceWrapperMut<T> for Rebox<T> {
    fn slice_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

struct HeapAllocator<T: Clone> {
    default_value: T,
}

impl<T: Clone> alloc_no_stdlib::Allocator<T> for HeapAllocator<T> {
    type AllocatedMemory = Rebox<T>;

    fn alloc_cell(self: &mut HeapAllocator<T>, len: usize) -> Rebox<T> {
        Rebox(vec![self.default_value.clone(); len].into_boxed_slice())
    }

    fn free_cell(self: &mut HeapAllocator<T>, _data: Rebox<T>) {}
}

/// Provides decompression for Brotli GUIDed sections.
#[derive(Default, Clone, Copy)]
pub struct BrotliSectionExtractor;

impl SectionExtractor for BrotliSectionExtractor {
    fn extract(&self, section: &Section) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let SectionHeader::GuidDefined(guid_header, _, _) = section.header() else {
            return Err(FirmwareFileSystemError::Unsupported);
        };
        if guid_header.section_definition_guid() != guid::BROTLI_SECTION {
            return Err(FirmwareFileSystemError::Unsupported);
        }

        let data = section.content();
        if data.len() < BROTLI_HEADER_SIZE {
            Err(FirmwareFileSystemError::DataCorrupt)?;
        }
        let mut out_size = [0u8; 8];
        out_size.copy_from_slice(&data[..8]);
        let out_size = usize::try_from(u64::from_le_bytes(out_size)).map_err(|_| FirmwareFileSystemError::DataCorrupt)?;

        let mut brotli_state = BrotliState::new(
            HeapAllocator::<u8> { default_value: 0 },
            HeapAllocator::<u32> { default_value: 0 },
            HeapAllocator::<HuffmanCode> { default_value: Default::default() },
        );
        let in_data = &data[BROTLI_HEADER_SIZE..];
        let mut out_data = vec![0u8; out_size];
        let mut out_data_size = 0;
        let result = BrotliDecompressStream(
            &mut in_data.len(),
            &mut 0,
            in_data,
            &mut out_data.len(),
            &mut 0,
            out_data.as_mut_slice(),
            &mut out_data_size,
            &mut brotli_state,
        );

        match result {
            BrotliResult::ResultSuccess => Ok(out_data),
            _ => {
                log::warn!(target: "pi_ffs", "Brotli section failed to decode");
                Err(FirmwareFileSystemError::DataCorrupt)
            }
        }
    }
}
