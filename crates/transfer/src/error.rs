//! Error types for uploads and downloads.
//!
//! Each failure kind is its own variant so callers can tell them apart, and
//! both enums map onto an HTTP status through [`IntoResponse`].

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur while persisting uploaded files.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The requested multipart field carried no file.
    #[error("no file provided in field '{field}'")]
    NoFileProvided {
        /// Form field that was searched.
        field: String,
    },

    /// The file exceeds the policy's size limit.
    #[error("file too large: exceeds limit of {limit} bytes")]
    FileTooLarge {
        /// Maximum allowed size in bytes.
        limit: u64,
    },

    /// The file extension is not in the allow-list.
    #[error("file extension '{extension}' is not allowed")]
    InvalidExtension {
        /// The rejected extension, lowercased. Empty when the file had none.
        extension: String,
    },

    /// Two files in one batch would be stored under the same name.
    #[error("duplicate file name '{name}' in upload batch")]
    DuplicateName {
        /// The saved name both files map to.
        name: String,
    },

    /// Disk I/O failed while persisting the file.
    #[error("failed to write {path}: {source}")]
    WriteFailure {
        /// Path being written when the failure occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The request body is not a readable multipart form.
    #[error("malformed multipart request: {0}")]
    MalformedRequest(String),

    /// The upload policy itself is unusable.
    #[error("invalid upload policy: {0}")]
    InvalidPolicy(String),
}

impl UploadError {
    pub(crate) fn write_failure(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoFileProvided { .. } | Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidExtension { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::DuplicateName { .. } => StatusCode::CONFLICT,
            Self::WriteFailure { .. } | Self::InvalidPolicy(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Upload failed");
            "upload could not be stored".to_string()
        } else {
            self.to_string()
        };

        (status, message).into_response()
    }
}

/// Errors that can occur while serving a stored file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The path does not name an existing regular file.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// The path resolves outside the serving root.
    #[error("path escapes serving root: {0}")]
    Forbidden(PathBuf),

    /// A computed or caller-supplied header is not valid HTTP.
    #[error("invalid response header: {0}")]
    InvalidHeader(String),

    /// I/O error before any response was produced.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error after headers were sent; the response cannot be corrected.
    #[error("stream of {path} failed: {source}")]
    StreamFailure {
        /// File being streamed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::FileNotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidHeader(_) | Self::Io(_) | Self::StreamFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Paths stay out of client-facing messages.
        let message = match &self {
            Self::FileNotFound(_) => "file not found".to_string(),
            Self::Forbidden(_) => "access denied".to_string(),
            _ => {
                tracing::error!(error = %self, "Download failed");
                "file could not be served".to_string()
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_status_codes() {
        let no_file = UploadError::NoFileProvided {
            field: "file".to_string(),
        };
        assert_eq!(no_file.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            UploadError::FileTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            UploadError::InvalidExtension {
                extension: "exe".to_string()
            }
            .status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        let duplicate = UploadError::DuplicateName {
            name: "a.png".to_string(),
        };
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);
        let write = UploadError::write_failure("/tmp/x", std::io::Error::other("disk full"));
        assert_eq!(write.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_download_status_codes() {
        assert_eq!(
            DownloadError::FileNotFound(PathBuf::from("a")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DownloadError::Forbidden(PathBuf::from("../a")).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_download_response_hides_paths() {
        let response = DownloadError::Forbidden(PathBuf::from("/etc/passwd")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_error_messages() {
        let err = UploadError::InvalidExtension {
            extension: "exe".to_string(),
        };
        assert_eq!(err.to_string(), "file extension 'exe' is not allowed");

        let err = UploadError::FileTooLarge { limit: 1000 };
        assert!(err.to_string().contains("1000"));
    }
}
