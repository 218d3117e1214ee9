//! Archive packaging module of the asset pipeline.
//!
//! The packager is an offline batch process: it reads the compiled asset
//! cache and the [`AssetRegistry`](gnt_data_offline::AssetRegistry) index and
//! consolidates every compiled output into one archive directory file plus
//! one or more archive content files that the runtime loads by identity.
//!
//! One packaging run moves through
//! `Collecting -> Indexing -> Writing -> Verifying -> Done`, terminal on
//! success or `Failed(reason)` from any state:
//!
//! 1. **Collecting** - snapshot the non-orphaned registry entries and confirm
//!    every compiled cache file exists. Unlike interactive import, nothing is
//!    silently skipped: a missing file fails the run.
//! 2. **Indexing** - group by asset type, sort each group by id, and assign
//!    assets to content-file buckets with a size-capped greedy packing.
//! 3. **Writing** - emit each content file in full, then the directory file
//!    that references their bytes.
//! 4. **Verifying** - re-read every content header and whole-body checksum
//!    and spot-check a sample of per-asset checksums before the archive is
//!    published.
//!
//! Packaging is deterministic: an unchanged registry and cache produce
//! byte-identical output files, which keeps archives diffable and cacheable.
//! Failures abort the whole run - a partially consistent archive is worse
//! than no archive - and partial output files are discarded.

// crate-specific lint exceptions:
//#![allow()]

use std::{io, path::PathBuf};

use gnt_data_runtime::AssetId;
use thiserror::Error;

/// Error returned by a packaging run.
#[derive(Error, Debug)]
pub enum Error {
    /// A registry entry has no compiled cache file.
    #[error("missing compiled asset '{id}' expected at '{path}'")]
    MissingCompiledAsset {
        /// Identity of the asset.
        id: AssetId,
        /// Cache path that was probed.
        path: PathBuf,
    },
    /// Verification of the written archive failed.
    #[error("corrupt packaging output: {0}")]
    CorruptOutput(String),
    /// IO error while writing the archive.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

mod archive_writer;

mod options;
pub use options::*;

mod packager;
pub use packager::*;

#[cfg(test)]
mod test_packaging;
