//! # symdrop-core
//!
//! A library for uploading Apple debug symbol files to a crash-symbolication
//! service.
//!
//! This crate provides the core functionality for:
//! - Finding debug files (the DWARF payloads inside `.dSYM` bundles)
//! - Extracting per-architecture build identifiers from Mach-O binaries
//! - Uploading each slice through a signed-URL, retrying transient failures
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`collect`]: Debug file discovery
//! - [`macho`]: Mach-O and fat binary parsing
//! - [`client`]: Control-plane client, transport and retry
//! - [`upload`]: Collect, parse and upload orchestration
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use symdrop_core::{ApiClient, ClientConfig, UploadOptions, Uploader};
//! use std::path::PathBuf;
//!
//! # async fn run() -> symdrop_core::Result<()> {
//! let client = ApiClient::new(ClientConfig::new("org:app:secret"))?;
//! let options = UploadOptions::new("1.2.3", vec![PathBuf::from("build/")]);
//!
//! let report = Uploader::new(client).run(&options).await?;
//! println!("uploaded {} slice(s)", report.uploaded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Extensibility
//!
//! - [`ByteSource`]: Parse Mach-O data from somewhere other than a file
//! - [`Transport`]: Send control-plane and storage requests another way
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod client;
pub mod collect;
pub mod error;
pub mod macho;
pub mod upload;

// Re-export commonly used types at the crate root
pub use client::{
    ApiClient, ClientConfig, HttpRequest, HttpResponse, RetryPolicy, StorageWebhook, Transport,
};
pub use collect::{FileCollector, FileDescriptor};
pub use error::{Error, ErrorKind, Result, WrappedError};
pub use macho::{Arch, ArchEntry, ByteSource};
pub use upload::{UploadOptions, UploadReport, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
