//! Upload and download policies.
//!
//! Policies are plain values built by the caller for each request. Nothing in
//! this crate mutates them, so requests with different policies can run side
//! by side.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::UploadError;

/// Default upload size limit (10MB).
pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// Rules applied to every file of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    destination_dir: PathBuf,
    max_size_bytes: u64,
    allowed_extensions: BTreeSet<String>,
    randomize_filename: bool,
    filename_prefix: String,
}

impl UploadPolicy {
    /// Create a policy writing into `destination_dir`.
    ///
    /// Defaults: 10MB limit, any extension, sanitized original names, no
    /// prefix.
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            max_size_bytes: DEFAULT_MAX_SIZE,
            allowed_extensions: BTreeSet::new(),
            randomize_filename: false,
            filename_prefix: String::new(),
        }
    }

    /// Set the per-file size limit in bytes.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Restrict uploads to the given extensions.
    ///
    /// Entries are trimmed, stripped of a leading dot and lowercased, so
    /// `".PNG"` and `"png"` are equivalent. Blank entries are ignored.
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    /// Replace sanitized original names with random tokens.
    pub fn with_randomized_names(mut self, randomize: bool) -> Self {
        self.randomize_filename = randomize;
        self
    }

    /// Prefix prepended to every saved name.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn allowed_extensions(&self) -> &BTreeSet<String> {
        &self.allowed_extensions
    }

    pub fn randomize_filename(&self) -> bool {
        self.randomize_filename
    }

    pub fn filename_prefix(&self) -> &str {
        &self.filename_prefix
    }

    /// Check that the policy can be applied at all.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.max_size_bytes == 0 {
            return Err(UploadError::InvalidPolicy(
                "max_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.destination_dir.as_os_str().is_empty() {
            return Err(UploadError::InvalidPolicy(
                "destination_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Check an extension against the allow-list.
    ///
    /// An empty allow-list accepts everything. A file without an extension
    /// is rejected by any non-empty allow-list.
    pub fn check_extension(&self, extension: Option<&str>) -> Result<(), UploadError> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }

        let extension = extension.unwrap_or("").to_ascii_lowercase();
        if self.allowed_extensions.contains(&extension) {
            Ok(())
        } else {
            Err(UploadError::InvalidExtension { extension })
        }
    }

    /// Check a size against the limit.
    pub fn check_size(&self, size: u64) -> Result<(), UploadError> {
        if size > self.max_size_bytes {
            Err(UploadError::FileTooLarge {
                limit: self.max_size_bytes,
            })
        } else {
            Ok(())
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// How a stored file is presented to the client.
///
/// Extra headers are applied after the computed ones, so an entry here
/// overrides `Content-Type` or `Content-Disposition` when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPolicy {
    force_download: bool,
    suggested_filename: Option<String>,
    extra_headers: BTreeMap<String, String>,
}

impl DownloadPolicy {
    /// Display in the browser (`Content-Disposition: inline`).
    pub fn inline() -> Self {
        Self::default()
    }

    /// Force a save dialog (`Content-Disposition: attachment`).
    pub fn attachment() -> Self {
        Self {
            force_download: true,
            ..Self::default()
        }
    }

    pub fn with_force_download(mut self, force: bool) -> Self {
        self.force_download = force;
        self
    }

    /// Name offered to the client instead of the on-disk basename.
    ///
    /// The name is sanitized when the response is built. Blank names are
    /// ignored.
    pub fn with_suggested_filename(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.suggested_filename = if name.trim().is_empty() {
            None
        } else {
            Some(name)
        };
        self
    }

    /// Add a header applied verbatim to the response.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn force_download(&self) -> bool {
        self.force_download
    }

    pub fn suggested_filename(&self) -> Option<&str> {
        self.suggested_filename.as_deref()
    }

    pub fn extra_headers(&self) -> &BTreeMap<String, String> {
        &self.extra_headers
    }
}
