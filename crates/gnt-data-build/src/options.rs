use std::path::{Path, PathBuf};

use crate::Packager;

/// Options and flags used by [`Packager`].
///
/// Call [`PackagingOptions::new`], chain the setters, then call
/// [`PackagingOptions::create`] to obtain a [`Packager`] to run.
///
/// # Example Usage
///
/// ```no_run
/// # use gnt_data_build::PackagingOptions;
/// let packager = PackagingOptions::new("./archives/")
///     .archive_name("assets")
///     .max_content_size(64 * 1024 * 1024)
///     .create();
/// ```
#[derive(Clone, Debug)]
pub struct PackagingOptions {
    pub(crate) output_dir: PathBuf,
    pub(crate) name: String,
    pub(crate) max_content_size: u64,
    pub(crate) build_code: u32,
    pub(crate) verify_sample: usize,
}

impl PackagingOptions {
    /// Creates options writing the archive pair under `output_dir`.
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_owned(),
            name: "assets".to_owned(),
            max_content_size: 64 * 1024 * 1024,
            build_code: 0,
            verify_sample: 16,
        }
    }

    /// Sets the file name stem of the emitted archive pair.
    pub fn archive_name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Sets the maximum byte size of one content file.
    ///
    /// Assets larger than the maximum get a dedicated content file of their
    /// own.
    pub fn max_content_size(mut self, max: u64) -> Self {
        self.max_content_size = max;
        self
    }

    /// Sets the build code stamped into every emitted header.
    ///
    /// Caller-supplied so that re-running an unchanged build stays
    /// byte-identical; never derived from the wall clock.
    pub fn build_code(mut self, build_code: u32) -> Self {
        self.build_code = build_code;
        self
    }

    /// Sets how many assets the verifying phase re-reads and re-checksums.
    pub fn verify_sample(mut self, sample: usize) -> Self {
        self.verify_sample = sample;
        self
    }

    /// Creates a [`Packager`] for these options.
    pub fn create(self) -> Packager {
        Packager::new(self)
    }
}
