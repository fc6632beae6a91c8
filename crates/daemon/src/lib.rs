//! # Bindle Daemon Library
//!
//! This crate wires the [`transfer`] core into a standalone HTTP service.
//!
//! ## Overview
//!
//! The daemon accepts multipart uploads into a configured directory and
//! serves stored files back. It provides:
//!
//! - **Upload Endpoints**: single and batch uploads with per-route name prefixes
//! - **Download Endpoints**: inline viewing and forced downloads with a
//!   client-chosen filename
//! - **Configuration**: TOML file with environment overrides
//! - **Logging**: stdout and optional daily-rotated log files
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       axum Router                        │
//! │          (body limit, request tracing, app state)        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────────────┐  ┌───────────────────────┐  │
//! │  │  POST /upload           │  │  GET /files/{name}    │  │
//! │  │  POST /upload-multiple  │  │  GET /download/{name} │  │
//! │  └────────────┬────────────┘  └───────────┬───────────┘  │
//! │               │                           │              │
//! │  ┌────────────▼────────────┐  ┌───────────▼───────────┐  │
//! │  │  transfer::save_one     │  │  transfer::serve      │  │
//! │  │  transfer::save_many    │  │                       │  │
//! │  └─────────────────────────┘  └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     // Serves until Ctrl-C or SIGTERM
//!     daemon::server::run(&config).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`logging`]: Tracing subscriber setup
//! - [`server`]: HTTP routes and server lifecycle

pub mod config;
pub mod logging;
pub mod server;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export server types for convenience
pub use server::{router, serve_on, AppState};
