//! # Section Extractor Implementations
//!
//! Implementations of [`pi_ffs::section::SectionExtractor`] for the GUID-defined encapsulations a platform
//! commonly ships, and a [`GuidedSectionExtractorRegistry`] that dispatches on the section definition GUID.
//!
//! ## Features
//!
//! Each codec sits behind a feature so a platform only builds what it uses:
//! - `brotli`: [`BrotliSectionExtractor`].
//! - `crc32`: [`Crc32SectionExtractor`], which verifies CRC32 GUID-defined sections and returns the payload.
//! - `lzma`: [`LzmaSectionExtractor`]. Requires `std`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
extern crate alloc;

#[cfg(feature = "brotli")]
mod brotli;
#[cfg(feature = "brotli")]
pub use brotli::BrotliSectionExtractor;

#[cfg(feature = "crc32")]
mod crc32;
#[cfg(feature = "crc32")]
pub use crc32::Crc32SectionExtractor;

#[cfg(feature = "lzma")]
mod lzma;
#[cfg(feature = "lzma")]
pub use lzma::LzmaSectionExtractor;

mod composite;
pub use composite::CompositeSectionExtractor;

mod null;
pub use null::NullSectionExtractor;

mod registry;
pub use registry::GuidedSectionExtractorRegistry;
