//! Offline (import-time) half of the asset packaging pipeline.
//!
//! This crate tracks the identity of source content files and the compiled
//! output each one maps to:
//!
//! * [`MetaFile`] - the human-diffable `.meta` sidecar persisting a source
//!   file's subasset name to [`AssetId`](gnt_data_runtime::AssetId) mapping
//!   and the importer version that last processed it.
//! * [`Importer`] registration and dispatch - a table of
//!   `(extension, version, import closure)` entries; only stale sources are
//!   re-imported.
//! * [`AssetRegistry`] - the in-memory index of every known asset, built by
//!   scanning meta files, queried by the running program and by the archive
//!   packager in `gnt-data-build`.
//!
//! # Structure on disk
//!
//! A project with two imported sources looks as follows (where **cache/** is
//! the compiled asset cache the packager consumes):
//!
//! ```markdown
//!  ./
//!  | + source/
//!  | |- rock.png
//!  | |- rock.png.meta
//!  | |- rock.msh
//!  | |- rock.msh.meta
//!  | + cache/
//!  |   |- 1c0cf2f9-9c27-4e1d-a816-fde6a7eb0c9e
//!  |   |- 6b9a54b2-0c63-40ad-a480-6a977e1d7c3b
//! ```
//!
//! Importers run in parallel worker threads; the registry index is guarded by
//! a single short-lived lock that is never held across importer file i/o, and
//! meta-file access is serialized per source path only.

// crate-specific lint exceptions:
//#![allow()]

mod metadata;
pub use metadata::*;

mod importer;
pub use importer::*;

mod registry;
pub use registry::*;
