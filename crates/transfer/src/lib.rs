//! # Bindle Transfer
//!
//! Secure file transfer for HTTP servers: multipart uploads are validated and
//! stored atomically, and stored files are served back with controlled
//! `Content-Disposition` semantics.
//!
//! ## Overview
//!
//! - **Filename Sanitizer**: reduces untrusted filenames to a single safe
//!   path segment, optionally replacing them with random tokens
//! - **Upload Processor**: streams multipart file parts to disk under an
//!   [`UploadPolicy`], enforcing size and extension limits
//! - **Download Server**: resolves a path inside a [`ServingRoot`] and
//!   streams it back under a [`DownloadPolicy`]
//!
//! Both paths are stateless: every call takes its policy as an argument and
//! the filesystem is the only shared state.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use axum::extract::Request;
//! use axum::http::Method;
//! use axum::response::{IntoResponse, Response};
//! use transfer::{save_one, serve, DownloadPolicy, ServingRoot, UploadPolicy};
//!
//! async fn upload(request: Request) -> Response {
//!     let policy = UploadPolicy::new("./uploads")
//!         .with_max_size(5 * 1024 * 1024)
//!         .with_allowed_extensions(["jpg", "png", "pdf"])
//!         .with_randomized_names(true)
//!         .with_prefix("upload_");
//!
//!     match save_one(request, "file", &policy).await {
//!         Ok(saved) => saved.saved_name.into_response(),
//!         Err(e) => e.into_response(),
//!     }
//! }
//!
//! async fn download(method: Method) -> Response {
//!     let root = ServingRoot::new("./uploads");
//!     let policy = DownloadPolicy::attachment().with_suggested_filename("report.pdf");
//!
//!     match serve(&method, &root, "test-document.pdf", &policy).await {
//!         Ok(response) => response,
//!         Err(e) => e.into_response(),
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`sanitize`]: filename cleaning and random tokens
//! - [`policy`]: upload and download policies
//! - [`upload`]: multipart upload processing
//! - [`download`]: file serving
//! - [`error`]: error types

pub mod download;
pub mod error;
pub mod policy;
pub mod sanitize;
pub mod upload;

pub use download::{serve, ServingRoot};
pub use error::{DownloadError, UploadError};
pub use policy::{DownloadPolicy, UploadPolicy, DEFAULT_MAX_SIZE};
pub use sanitize::{sanitize_filename, SanitizedName, TOKEN_LENGTH};
pub use upload::{save_many, save_one, SavedFile};
