//! Serving stored files with controlled disposition.
//!
//! Paths are resolved against a [`ServingRoot`] before anything is opened:
//! lexical `..` escapes are rejected first, then the canonical path (with
//! symlinks followed) must still lie inside the canonical root.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use futures_util::TryStreamExt;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::error::DownloadError;
use crate::policy::DownloadPolicy;
use crate::sanitize::header_filename;

/// Trusted directory that downloads are served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingRoot {
    root: PathBuf,
}

impl ServingRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` to the canonical path of a regular file inside the root.
    ///
    /// Relative paths are taken relative to the root; a relative path that
    /// already starts with the root (`uploads/a.pdf` for root `uploads`) is
    /// accepted as well. Absolute paths must point inside the root.
    pub async fn resolve(&self, path: &Path) -> Result<PathBuf, DownloadError> {
        let root = fs::canonicalize(&self.root)
            .await
            .map_err(|e| missing_or_io(e, &self.root))?;

        let candidate = if path.is_absolute() {
            let normalized =
                normalize(path).ok_or_else(|| DownloadError::Forbidden(path.to_path_buf()))?;
            if !normalized.starts_with(&root) && !normalized.starts_with(&self.root) {
                warn!(path = ?path, "Rejected download outside serving root");
                return Err(DownloadError::Forbidden(path.to_path_buf()));
            }
            normalized
        } else {
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let normalized = normalize(relative).ok_or_else(|| {
                warn!(path = ?path, "Rejected download path traversal");
                DownloadError::Forbidden(path.to_path_buf())
            })?;
            root.join(normalized)
        };

        let canonical = fs::canonicalize(&candidate)
            .await
            .map_err(|e| missing_or_io(e, path))?;

        if !canonical.starts_with(&root) {
            warn!(path = ?path, resolved = ?canonical, "Rejected download escaping serving root");
            return Err(DownloadError::Forbidden(path.to_path_buf()));
        }

        let metadata = fs::metadata(&canonical)
            .await
            .map_err(|e| missing_or_io(e, path))?;
        if !metadata.is_file() {
            return Err(DownloadError::FileNotFound(path.to_path_buf()));
        }

        Ok(canonical)
    }
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// Returns `None` when `..` would climb above the start of the path.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
        }
    }

    Some(out)
}

fn missing_or_io(error: std::io::Error, path: &Path) -> DownloadError {
    match error.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory => {
            DownloadError::FileNotFound(path.to_path_buf())
        }
        _ => DownloadError::Io(error),
    }
}

/// Serve the file at `file_path` under `root`.
///
/// All validation happens before the response exists: a missing file,
/// an escaping path or an invalid header is returned as an error and no body
/// is produced. `HEAD` requests receive the headers only. Once streaming has
/// started, read errors are logged and end the body with
/// [`DownloadError::StreamFailure`].
pub async fn serve(
    method: &Method,
    root: &ServingRoot,
    file_path: impl AsRef<Path>,
    policy: &DownloadPolicy,
) -> Result<Response, DownloadError> {
    let requested = file_path.as_ref();
    let path = root.resolve(requested).await?;
    let metadata = fs::metadata(&path)
        .await
        .map_err(|e| missing_or_io(e, requested))?;

    let filename = match policy.suggested_filename() {
        Some(name) => header_filename(name),
        None => header_filename(
            &path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
    };

    let headers = response_headers(&path, &filename, metadata.len(), policy)?;

    let body = if *method == Method::HEAD {
        Body::empty()
    } else {
        let file = File::open(&path)
            .await
            .map_err(|e| missing_or_io(e, requested))?;
        stream_body(file, path.clone())
    };

    info!(
        path = ?path,
        filename = %filename,
        size = metadata.len(),
        attachment = policy.force_download(),
        "Serving download"
    );

    let mut response = Response::new(body);
    *response.headers_mut() = headers;
    Ok(response)
}

/// Build the response headers. Caller-supplied headers go last and win.
fn response_headers(
    path: &Path,
    filename: &str,
    size: u64,
    policy: &DownloadPolicy,
) -> Result<HeaderMap, DownloadError> {
    let mut headers = HeaderMap::new();

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| DownloadError::InvalidHeader(CONTENT_TYPE.to_string()))?,
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(policy.force_download(), filename))
            .map_err(|_| DownloadError::InvalidHeader(CONTENT_DISPOSITION.to_string()))?,
    );

    for (name, value) in policy.extra_headers() {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DownloadError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| DownloadError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// `attachment; filename="..."` or `inline; filename="..."`.
///
/// `filename` must already be sanitized; it cannot contain quotes.
pub fn content_disposition(force_download: bool, filename: &str) -> String {
    let kind = if force_download { "attachment" } else { "inline" };
    format!("{kind}; filename=\"{filename}\"")
}

fn stream_body(file: File, path: PathBuf) -> Body {
    let stream = ReaderStream::new(file).map_err(move |source| {
        error!(path = ?path, error = %source, "Download stream failed after headers were sent");
        DownloadError::StreamFailure {
            path: path.clone(),
            source,
        }
    });
    Body::from_stream(stream)
}
