//! Multipart uploads with atomic writes.
//!
//! Every file part is streamed into a hidden temporary file next to its final
//! location and renamed into place only after the whole part has been read
//! within the size limit. The temporary file is removed on any error and when
//! the upload future is dropped, so a failed or cancelled request never
//! leaves a truncated file under a final name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use axum::extract::Request;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use multer::{Field, Multipart};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::policy::UploadPolicy;
use crate::sanitize::{
    declared_extension, generate_token, sanitize_filename, saved_file_name, SanitizedName,
};

/// Permissions for a created destination directory.
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

/// Length of the random component in temporary file names.
const TEMP_TOKEN_LENGTH: usize = 8;

/// A file persisted by [`save_one`] or [`save_many`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedFile {
    /// Filename as sent by the client.
    pub original_name: String,
    /// Sanitized name on disk.
    pub saved_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Full path of the stored file.
    pub path: PathBuf,
    /// Hex-encoded SHA-256 of the stored bytes.
    pub sha256: String,
}

/// Save the first file sent under `field_name`.
///
/// Other parts are skipped. Fails with [`UploadError::NoFileProvided`] when
/// no part under `field_name` carries a filename.
pub async fn save_one(
    request: Request,
    field_name: &str,
    policy: &UploadPolicy,
) -> Result<SavedFile, UploadError> {
    policy.validate()?;
    let mut multipart = multipart_from_request(request)?;

    while let Some(field) = next_field(&mut multipart).await? {
        if is_file_part(&field, field_name) {
            let staged = stage_field(field, policy, &HashSet::new()).await?;
            return staged.commit().await;
        }
    }

    Err(UploadError::NoFileProvided {
        field: field_name.to_string(),
    })
}

/// Save every file sent under `field_name`.
///
/// The batch is all-or-nothing. Every part is written to a temporary file
/// first, and nothing is renamed into place until the whole request has been
/// read and validated. A failure or a dropped future before that point only
/// removes temporary files, so existing files in the destination are never
/// touched. Two parts that would be stored under the same name fail the
/// batch with [`UploadError::DuplicateName`].
pub async fn save_many(
    request: Request,
    field_name: &str,
    policy: &UploadPolicy,
) -> Result<Vec<SavedFile>, UploadError> {
    policy.validate()?;
    let mut multipart = multipart_from_request(request)?;
    let mut staged: Vec<StagedFile> = Vec::new();
    let mut taken = HashSet::new();

    while let Some(field) = next_field(&mut multipart).await? {
        if is_file_part(&field, field_name) {
            let file = stage_field(field, policy, &taken).await?;
            taken.insert(file.saved.saved_name.clone());
            staged.push(file);
        }
    }

    if staged.is_empty() {
        return Err(UploadError::NoFileProvided {
            field: field_name.to_string(),
        });
    }

    let mut batch = Batch::default();
    for file in staged {
        let replaced = fs::try_exists(&file.saved.path).await.unwrap_or(true);
        let saved = file.commit().await?;
        if !replaced {
            batch.created.push(saved.path.clone());
        }
        batch.files.push(saved);
    }

    let files = batch.keep();
    info!(field = field_name, count = files.len(), "Saved upload batch");
    Ok(files)
}

fn multipart_from_request(request: Request) -> Result<Multipart<'static>, UploadError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| UploadError::MalformedRequest("missing content-type header".to_string()))?;

    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| UploadError::MalformedRequest(format!("invalid multipart boundary: {e}")))?;

    Ok(Multipart::new(request.into_body().into_data_stream(), boundary))
}

async fn next_field(
    multipart: &mut Multipart<'static>,
) -> Result<Option<Field<'static>>, UploadError> {
    multipart.next_field().await.map_err(multipart_error)
}

fn multipart_error(error: multer::Error) -> UploadError {
    UploadError::MalformedRequest(error.to_string())
}

/// A part counts as a file when it has the requested name and a non-empty
/// filename. Browsers send an empty filename for an unselected file input.
fn is_file_part(field: &Field<'_>, field_name: &str) -> bool {
    field.name() == Some(field_name) && field.file_name().is_some_and(|name| !name.is_empty())
}

fn declared_length(field: &Field<'_>) -> Option<u64> {
    field
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Stream one part into a synced temporary file without renaming it.
///
/// `taken` holds names already claimed by earlier parts of the same batch.
async fn stage_field(
    mut field: Field<'static>,
    policy: &UploadPolicy,
    taken: &HashSet<String>,
) -> Result<StagedFile, UploadError> {
    let original_name = field.file_name().unwrap_or_default().to_string();

    if let Some(declared) = declared_length(&field) {
        policy.check_size(declared)?;
    }

    policy.check_extension(declared_extension(&original_name).as_deref())?;

    let cleaned = sanitize_filename(&original_name);
    let saved_name = choose_name(&cleaned, policy, taken)?;
    if cleaned.altered {
        debug!(original = %original_name, saved = %saved_name, "Sanitized upload filename");
    }

    let destination_dir = policy.destination_dir();
    ensure_dir(destination_dir).await?;

    let mut partial = PartialFile::create(destination_dir, &saved_name).await?;
    let mut hasher = Sha256::new();
    let mut size: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size = size
            .checked_add(chunk.len() as u64)
            .ok_or(UploadError::FileTooLarge {
                limit: policy.max_size_bytes(),
            })?;
        policy.check_size(size)?;

        partial.write(&chunk).await?;
        hasher.update(&chunk);
    }

    partial.finish().await?;

    Ok(StagedFile {
        partial,
        saved: SavedFile {
            path: destination_dir.join(&saved_name),
            original_name,
            saved_name,
            size,
            sha256: hex::encode(hasher.finalize()),
        },
    })
}

/// Pick a saved name not in `taken`. Randomized names are redrawn; a
/// repeated deterministic name is an error.
fn choose_name(
    cleaned: &SanitizedName,
    policy: &UploadPolicy,
    taken: &HashSet<String>,
) -> Result<String, UploadError> {
    let mut rng = rand::thread_rng();
    let mut saved_name = saved_file_name(cleaned, policy, &mut rng);

    while taken.contains(&saved_name) {
        if !policy.randomize_filename() {
            return Err(UploadError::DuplicateName { name: saved_name });
        }
        saved_name = saved_file_name(cleaned, policy, &mut rng);
    }

    Ok(saved_name)
}

/// A fully written upload waiting to be renamed onto its final name.
struct StagedFile {
    partial: PartialFile,
    saved: SavedFile,
}

impl StagedFile {
    async fn commit(self) -> Result<SavedFile, UploadError> {
        self.partial.commit(&self.saved.path).await?;

        info!(
            original = %self.saved.original_name,
            saved = %self.saved.saved_name,
            size = self.saved.size,
            "Saved upload"
        );
        Ok(self.saved)
    }
}

/// Create `dir` and any missing parents. An existing directory, including
/// one created concurrently by another request, is not an error.
async fn ensure_dir(dir: &Path) -> Result<(), UploadError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);

    builder
        .create(dir)
        .await
        .map_err(|e| UploadError::write_failure(dir, e))
}

/// Temporary file that is deleted on drop unless committed.
struct PartialFile {
    file: Option<File>,
    temp_path: PathBuf,
    committed: bool,
}

impl PartialFile {
    async fn create(dir: &Path, saved_name: &str) -> Result<Self, UploadError> {
        let token = generate_token(&mut rand::thread_rng(), TEMP_TOKEN_LENGTH);
        let temp_path = dir.join(format!(".{saved_name}.{token}.part"));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| UploadError::write_failure(&temp_path, e))?;

        Ok(Self {
            file: Some(file),
            temp_path,
            committed: false,
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), UploadError> {
        let file = self.file.as_mut().ok_or_else(|| {
            UploadError::write_failure(
                &self.temp_path,
                std::io::Error::other("file handle not available"),
            )
        })?;

        file.write_all(data)
            .await
            .map_err(|e| UploadError::write_failure(&self.temp_path, e))
    }

    /// Flush, sync and close the handle. The file stays under its temporary
    /// name until [`PartialFile::commit`].
    async fn finish(&mut self) -> Result<(), UploadError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| UploadError::write_failure(&self.temp_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| UploadError::write_failure(&self.temp_path, e))?;
        }
        Ok(())
    }

    /// Rename onto `final_path`, replacing any existing file.
    async fn commit(mut self, final_path: &Path) -> Result<(), UploadError> {
        self.finish().await?;

        fs::rename(&self.temp_path, final_path)
            .await
            .map_err(|e| UploadError::write_failure(final_path, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?self.temp_path, error = %e, "Failed to cleanup partial upload");
            }
        }
    }
}

/// Files renamed into place by a batch so far.
///
/// Only renames can fail here, after every part was read and validated. On
/// drop without [`Batch::keep`], files that did not exist before the batch
/// are removed again; files that replaced an earlier upload are left alone.
#[derive(Default)]
struct Batch {
    files: Vec<SavedFile>,
    created: Vec<PathBuf>,
    kept: bool,
}

impl Batch {
    fn keep(mut self) -> Vec<SavedFile> {
        self.kept = true;
        std::mem::take(&mut self.files)
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.kept || self.files.is_empty() {
            return;
        }

        warn!(count = self.files.len(), "Rolling back partially committed upload batch");
        for path in &self.created {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = ?path, error = %e, "Failed to remove file during batch rollback");
                }
            }
        }
    }
}
