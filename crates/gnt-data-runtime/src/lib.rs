//! Runtime half of the asset packaging pipeline.
//!
//! This crate defines the stable identity of assets ([`AssetId`], [`AssetType`])
//! and the binary layout of the packaged `archive pair` the runtime loads
//! assets from:
//!
//! ```markdown
//! |------ directory file (GDIR) ------|   |----- content file (GARC) -----|
//! | header                            |   | header                        |
//! | asset-type section table          |   | asset #1 bytes                |
//! | asset-info table (sorted per type)|   | asset #2 bytes                |
//! | archive-info table                |   | ...                           |
//! | string table                      |   |-------------------------------|
//! |-----------------------------------|
//! ```
//!
//! The directory file is the index: one `AssetInfo` record per asset, grouped
//! by [`AssetType`] and sorted by [`AssetId`] within the group, so locating an
//! asset touches only its own type section and a binary search. Each record
//! points into one of the content files by `(archive index, offset, length)`
//! and carries a CRC-32 of the payload so corruption is caught before the
//! bytes reach a decoder.
//!
//! Writers for both files live in `gnt-data-build`; this crate holds the
//! shared layout ([`format`]) and the readers ([`ArchiveDirectory`],
//! [`ArchiveReader`]) used at load time.

// crate-specific lint exceptions:
//#![allow()]

mod types;
pub use types::*;

pub mod format;

mod archive;
pub use archive::*;
